use std::{num::NonZeroU64, str::FromStr, time::Duration};

use jsonwebtoken::Algorithm;
use url::Url;

pub const DOMAIN_VAR: &str = "AUTH_DOMAIN";
pub const AUDIENCE_VAR: &str = "AUTH_AUDIENCE";
pub const ISSUER_VAR: &str = "AUTH_ISSUER";
pub const ALGORITHMS_VAR: &str = "AUTH_ALGORITHMS";
pub const JWKS_CACHE_TTL_VAR: &str = "AUTH_JWKS_CACHE_TTL_SECS";
pub const JWKS_TIMEOUT_VAR: &str = "AUTH_JWKS_TIMEOUT_MS";
pub const LEEWAY_VAR: &str = "AUTH_LEEWAY_SECS";
pub const JWKS_MAX_FETCHES_VAR: &str = "AUTH_JWKS_MAX_FETCHES_PER_MINUTE";

pub const DEFAULT_JWKS_TIMEOUT: Duration = Duration::from_millis(5000);

/// Path under the identity provider's domain where its JWK set is published.
pub const JWKS_PATH: &str = ".well-known/jwks.json";

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {var}")]
    Missing { var: &'static str },
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
    #[error("symmetric algorithm {algorithm:?} is not allowed for token verification")]
    SymmetricAlgorithm { algorithm: Algorithm },
    #[error("at least one signing algorithm must be allowed")]
    NoAlgorithms,
}

/// Startup configuration of the authorization middleware.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub domain: String,
    pub jwks_url: Url,
    pub audience: String,
    pub issuer: String,
    pub algorithms: Vec<Algorithm>,
    /// `None` keeps fetched keys for the lifetime of the process.
    pub jwks_cache_ttl: Option<Duration>,
    pub jwks_fetch_timeout: Duration,
    pub leeway_secs: u64,
    pub jwks_max_fetches_per_minute: Option<NonZeroU64>,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &'static str| lookup(var).filter(|value| !value.trim().is_empty());
        let require = |var: &'static str| get(var).ok_or(ConfigError::Missing { var });

        let domain = require(DOMAIN_VAR)?;
        let audience = require(AUDIENCE_VAR)?;
        let issuer = require(ISSUER_VAR)?;
        let algorithms = parse_algorithms(&require(ALGORITHMS_VAR)?)?;
        let jwks_url = jwks_url(&domain)?;

        let jwks_cache_ttl = get(JWKS_CACHE_TTL_VAR)
            .map(|value| parse_number::<u64>(JWKS_CACHE_TTL_VAR, &value))
            .transpose()?
            .map(Duration::from_secs);
        let jwks_fetch_timeout = get(JWKS_TIMEOUT_VAR)
            .map(|value| parse_number::<u64>(JWKS_TIMEOUT_VAR, &value))
            .transpose()?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_JWKS_TIMEOUT);
        let leeway_secs = get(LEEWAY_VAR)
            .map(|value| parse_number::<u64>(LEEWAY_VAR, &value))
            .transpose()?
            .unwrap_or(0);
        let jwks_max_fetches_per_minute = get(JWKS_MAX_FETCHES_VAR)
            .map(|value| parse_number::<NonZeroU64>(JWKS_MAX_FETCHES_VAR, &value))
            .transpose()?;

        Ok(Self {
            domain,
            jwks_url,
            audience,
            issuer,
            algorithms,
            jwks_cache_ttl,
            jwks_fetch_timeout,
            leeway_secs,
            jwks_max_fetches_per_minute,
        })
    }
}

fn parse_number<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
        var,
        reason: err.to_string(),
    })
}

fn parse_algorithms(value: &str) -> Result<Vec<Algorithm>, ConfigError> {
    let mut algorithms = Vec::new();
    for name in value.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        let algorithm = Algorithm::from_str(name).map_err(|_| ConfigError::Invalid {
            var: ALGORITHMS_VAR,
            reason: format!("unknown algorithm `{name}`"),
        })?;
        if !is_asymmetric(algorithm) {
            return Err(ConfigError::SymmetricAlgorithm { algorithm });
        }
        if !algorithms.contains(&algorithm) {
            algorithms.push(algorithm);
        }
    }
    if algorithms.is_empty() {
        return Err(ConfigError::NoAlgorithms);
    }
    Ok(algorithms)
}

pub(crate) fn is_asymmetric(algorithm: Algorithm) -> bool {
    !matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}

/// Derives the JWK set URL from the identity provider's domain.
///
/// A bare domain is assumed to be served over HTTPS; a domain with an explicit scheme is used as the base URL.
fn jwks_url(domain: &str) -> Result<Url, ConfigError> {
    let domain = domain.trim().trim_end_matches('/');
    let base = if domain.contains("://") {
        format!("{domain}/")
    } else {
        format!("https://{domain}/")
    };
    Url::parse(&base)
        .and_then(|base| base.join(JWKS_PATH))
        .map_err(|err| ConfigError::Invalid {
            var: DOMAIN_VAR,
            reason: err.to_string(),
        })
}
