use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};
use futures::future::BoxFuture;
use http::HeaderMap;
use tower::Layer;
use tower_service::Service;

use crate::config::AuthConfig;
use crate::key_store::KeyStore;
use crate::permissions;
use crate::remote_jwk_set::RemoteJwkSet;
use crate::token::{TokenClaims, TokenVerifier};
use crate::Error;

/// Entry point for protecting operations: verifies the bearer token of a request and checks a required permission.
///
/// Cloning is cheap; all clones share the verifier and its key cache.
#[derive(Clone)]
pub struct Authorizer {
    inner: Arc<AuthorizerInner>,
}

struct AuthorizerInner {
    verifier: TokenVerifier,
    issuer: String,
    audience: String,
}

impl Authorizer {
    pub fn new(
        verifier: TokenVerifier,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(AuthorizerInner {
                verifier,
                issuer: issuer.into(),
                audience: audience.into(),
            }),
        }
    }

    /// Wires up the remote key set, key cache and verifier described by `config`.
    ///
    /// Must be called within a Tokio runtime when outbound rate limiting is configured.
    pub fn from_config(config: &AuthConfig) -> Self {
        let mut remote_jwk_set =
            RemoteJwkSet::builder(config.jwks_url.clone()).with_timeout(config.jwks_fetch_timeout);
        if let Some(max_fetches) = config.jwks_max_fetches_per_minute {
            remote_jwk_set = remote_jwk_set.with_rate_limit(max_fetches, Duration::from_secs(60));
        }

        let mut key_store = KeyStore::builder(remote_jwk_set.build());
        if let Some(time_to_live) = config.jwks_cache_ttl {
            key_store = key_store.with_cache_ttl(time_to_live);
        }

        let verifier = TokenVerifier::new(key_store.build(), config.algorithms.iter().copied())
            .with_leeway(config.leeway_secs);
        tracing::info!(
            domain = %config.domain,
            jwks_url = %config.jwks_url,
            algorithms = ?config.algorithms,
            "configured token authorization"
        );
        Self::new(verifier, config.issuer.clone(), config.audience.clone())
    }

    /// Returns the verified claims if the request carries a valid bearer token granting `required_permission`.
    pub async fn authorize_request(
        &self,
        headers: &HeaderMap,
        required_permission: &str,
    ) -> Result<TokenClaims, Error> {
        let token = bearer_token(headers)?;
        let claims = self
            .inner
            .verifier
            .verify(&token, &self.inner.issuer, &self.inner.audience)
            .await?;
        permissions::authorize(&claims, required_permission)?;
        Ok(claims)
    }

    /// Layer guarding a route with `required_permission`, e.g. `.route_layer(authorizer.require("get:actors"))`.
    pub fn require(&self, required_permission: impl Into<String>) -> AuthorizationLayer {
        let required_permission: String = required_permission.into();
        AuthorizationLayer {
            authorizer: self.clone(),
            required_permission: Arc::from(required_permission),
        }
    }
}

/// Extracts the token of an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Result<String, Error> {
    let Authorization(bearer) = headers
        .typed_try_get::<Authorization<Bearer>>()
        .map_err(|_| Error::MalformedAuthorizationHeader)?
        .ok_or(Error::MissingAuthorizationHeader)?;

    let token = bearer.token();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(Error::MalformedAuthorizationHeader);
    }
    Ok(token.to_string())
}

#[derive(Clone)]
pub struct AuthorizationLayer {
    authorizer: Authorizer,
    required_permission: Arc<str>,
}

impl<S> Layer<S> for AuthorizationLayer {
    type Service = AuthorizationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthorizationService {
            inner,
            authorizer: self.authorizer.clone(),
            required_permission: self.required_permission.clone(),
        }
    }
}

/// Calls the inner service only for authorized requests, with the verified [`TokenClaims`] in the request extensions.
#[derive(Clone)]
pub struct AuthorizationService<S> {
    inner: S,
    authorizer: Authorizer,
    required_permission: Arc<str>,
}

impl<S> Service<Request> for AuthorizationService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        // Move the original service into the closure instead of its clone. This makes sure that the original service is
        // `call`ed instead of the cloned one, which might not be ready yet (`poll_ready` hasn't been called on the
        // clone yet).
        // See [docs](https://docs.rs/tower/latest/tower/trait.Service.html#be-careful-when-cloning-inner-services).
        let inner_clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, inner_clone);

        let authorizer = self.authorizer.clone();
        let required_permission = self.required_permission.clone();
        Box::pin(async move {
            let authorize_result = authorizer
                .authorize_request(req.headers(), &required_permission)
                .await;
            match authorize_result {
                Ok(claims) => {
                    req.extensions_mut().insert(claims);
                    inner.call(req).await
                }
                Err(auth_error) => {
                    tracing::debug!(
                        code = auth_error.code(),
                        permission = &*required_permission,
                        method = %req.method(),
                        path = req.uri().path(),
                        "rejected unauthorized request"
                    );
                    Ok(auth_error.into_response())
                }
            }
        })
    }
}
