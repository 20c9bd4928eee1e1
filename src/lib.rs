//! Permission-scoped bearer token authorization [middleware for `axum`](https://docs.rs/axum/latest/axum/middleware/index.html),
//! verifying [JSON Web Tokens (JWT)](https://datatracker.ietf.org/doc/html/rfc7519) against the
//! [JSON Web Key (JWK)](https://datatracker.ietf.org/doc/html/rfc7517) set of an external identity provider.
//!
//! ## Overview
//!
//! Identity providers such as Auth0 issue access tokens that carry a `permissions` claim, a flat list of scopes like
//! `get:actors` or `delete:movies`. This crate checks, per protected route, that a request
//!
//! 1. carries an `Authorization: Bearer <token>` header,
//! 2. whose token is signed with an asymmetric algorithm by a key the provider currently publishes,
//! 3. is not expired and was issued by the expected issuer for the expected audience,
//! 4. and grants the permission the route requires.
//!
//! Every failure maps to one [`Error`] kind, rendered as `401 Unauthorized` (or `403 Forbidden` when only the
//! permission is missing) with a JSON body `{ "success": false, "error": <status>, "message": <string> }`.
//!
//! ## Features
//!
//! - **Explicit composition**: [`Authorizer::require`] returns a `tower` layer for a single route and permission.
//!   Handlers receive the verified [`TokenClaims`] through `axum::Extension`.
//! - **Key caching**: signing keys are cached by key ID, optionally with a time-to-live. A token signed with an unknown
//!   key ID triggers one refresh of the key set; concurrent requests missing the cache share that refresh.
//! - **Bounded fetches**: fetching the key set is bounded by a timeout and can be rate limited, so an unavailable
//!   provider surfaces as [`Error::KeyStoreUnavailable`] instead of hanging requests.
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use axum::{routing::get, Extension, Router};
//! use jwks_guard::{AuthConfig, Authorizer, TokenClaims};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads AUTH_DOMAIN, AUTH_AUDIENCE, AUTH_ISSUER and AUTH_ALGORITHMS.
//!     let config = AuthConfig::from_env()?;
//!     let authorizer = Authorizer::from_config(&config);
//!
//!     let router = Router::new().route(
//!         "/actors",
//!         get(|Extension(claims): Extension<TokenClaims>| async move {
//!             format!("Hello {}!", claims.sub)
//!         })
//!         .route_layer(authorizer.require("get:actors")),
//!     );
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod authorization;
pub mod config;
pub mod key_store;
pub mod permissions;
pub mod token;

pub use authorization::{AuthorizationLayer, Authorizer};
pub use config::{AuthConfig, ConfigError};
pub use error::{Error, FetchError};
pub use key_source::KeySource;
pub use key_store::{KeyStore, SigningKey};
pub use remote_jwk_set::{RemoteJwkSet, RemoteJwkSetBuilder};
pub use token::{TokenClaims, TokenVerifier};

mod error;
mod key_source;
mod remote_jwk_set;

#[cfg(test)]
mod test_support;
