use std::{
    num::NonZeroU64,
    task::{Context, Poll},
    time::Duration,
};

use futures::future::BoxFuture;
use jsonwebtoken::jwk::JwkSet;
use reqwest::Client;
use tower::{
    buffer::BufferLayer, util::BoxCloneService, Layer, Service, ServiceBuilder, ServiceExt,
};
use tower_layer::layer_fn;
use url::Url;

use crate::{config::DEFAULT_JWKS_TIMEOUT, FetchError};

struct RateLimitConfig {
    num: u64,
    per: Duration,
}

/// Builder for configuring a `RemoteJwkSet` with a fetch timeout and optional rate limiting.
pub struct RemoteJwkSetBuilder {
    url: Url,
    timeout: Duration,
    rate_limit_config: Option<RateLimitConfig>,
    http_client: Option<Client>,
}

impl RemoteJwkSetBuilder {
    /// Creates a new builder with the given JWKS URL.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            timeout: DEFAULT_JWKS_TIMEOUT,
            rate_limit_config: None,
            http_client: None,
        }
    }

    /// Upper bound for a single fetch, including time spent waiting for the rate limiter.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Allow at most `num` outgoing requests per `per` interval.
    pub fn with_rate_limit(mut self, num: NonZeroU64, per: Duration) -> Self {
        self.rate_limit_config = Some(RateLimitConfig {
            num: num.get(),
            per,
        });
        self
    }

    /// Use a preconfigured client, e.g. with a custom user agent or proxy, instead of a default one.
    pub fn with_http_client(mut self, http_client: Client) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Builds the `RemoteJwkSet` with the configured options.
    ///
    /// Rate limiting spawns a buffer worker, so this must be called within a Tokio runtime when it is enabled.
    pub fn build(self) -> RemoteJwkSet {
        let request_service = JwkSetRequestService {
            http_client: self.http_client.unwrap_or_default(),
            url: self.url.clone(),
        };

        let rate_limit_layer = self.rate_limit_config.map(|rate_limit_config| {
            layer_fn(move |inner: JwkSetRequestService| {
                let rate_limit =
                    tower::limit::RateLimitLayer::new(rate_limit_config.num, rate_limit_config.per);
                let rate_limited_service = rate_limit.layer(inner);

                // Wrap the rate limited service in another buffer service to make it `Clone`.
                let buffered_service = BufferLayer::<()>::new(1024).layer(rate_limited_service);

                buffered_service.map_err(FetchError::from_boxed)
            })
        });

        let service_tower = ServiceBuilder::new()
            .map_err(FetchError::from_boxed)
            .timeout(self.timeout)
            .option_layer(rate_limit_layer)
            .service(request_service);

        RemoteJwkSet {
            url: self.url,
            service_tower: BoxCloneService::new(service_tower),
        }
    }
}

/// JWK set hosted by the identity provider.
#[derive(Clone)]
pub struct RemoteJwkSet {
    url: Url,
    service_tower: BoxCloneService<(), JwkSet, FetchError>,
}

impl RemoteJwkSet {
    /// Creates a builder for configuring a `RemoteJwkSet`.
    pub fn builder(url: Url) -> RemoteJwkSetBuilder {
        RemoteJwkSetBuilder::new(url)
    }

    pub async fn jwk_set(&mut self) -> Result<JwkSet, FetchError> {
        self.service_tower.ready().await?.call(()).await
    }
}

impl std::fmt::Debug for RemoteJwkSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteJwkSet")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

/// Helper service wrapping a `reqwest::Client` to fetch a JWK Set from a given URL.
#[derive(Clone)]
struct JwkSetRequestService {
    http_client: Client,
    url: Url,
}

impl Service<()> for JwkSetRequestService {
    type Response = JwkSet;
    type Error = FetchError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: ()) -> Self::Future {
        let http_client = self.http_client.clone();
        let url = self.url.clone();
        Box::pin(async move {
            let response = http_client.get(url).send().await?;

            if !response.status().is_success() {
                return Err(FetchError::ErrorResponse {
                    status_code: response.status(),
                });
            }

            let jwk_set: JwkSet = response.json().await?;
            Ok(jwk_set)
        })
    }
}
