use std::{collections::BTreeSet, str::FromStr};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, Validation};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{config::is_asymmetric, key_store::KeyStore, Error};

/// Verified claims of a bearer token.
///
/// Only produced by [`TokenVerifier::verify`], i.e. after the signature and the standard claims have been checked.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    pub sub: String,
    #[serde(deserialize_with = "one_or_many")]
    pub aud: Vec<String>,
    pub exp: u64,
    /// Permission scopes granted to the caller. `None` if the token has no `permissions` claim at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<BTreeSet<String>>,
    /// Remaining claims, e.g. `iat` or `azp`.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(audience) => vec![audience],
        OneOrMany::Many(audiences) => audiences,
    })
}

/// The part of the JOSE header needed before a key is known.
#[derive(Deserialize)]
struct TokenHeader {
    alg: String,
    kid: Option<String>,
}

/// Verifies bearer tokens against the signing keys of a [`KeyStore`].
#[derive(Clone)]
pub struct TokenVerifier {
    key_store: KeyStore,
    algorithms: Vec<Algorithm>,
    leeway_secs: u64,
}

impl TokenVerifier {
    /// Symmetric algorithms are dropped from `algorithms`; tokens using them are always rejected.
    pub fn new(key_store: KeyStore, algorithms: impl IntoIterator<Item = Algorithm>) -> Self {
        Self {
            key_store,
            algorithms: algorithms
                .into_iter()
                .filter(|algorithm| is_asymmetric(*algorithm))
                .collect(),
            leeway_secs: 0,
        }
    }

    /// Tolerated clock skew when checking `exp`.
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = leeway_secs;
        self
    }

    pub async fn verify(
        &self,
        raw_token: &str,
        expected_issuer: &str,
        expected_audience: &str,
    ) -> Result<TokenClaims, Error> {
        let header = decode_header(raw_token)?;

        let algorithm = Algorithm::from_str(&header.alg).map_err(|_| Error::UnsupportedAlgorithm)?;
        if !self.algorithms.contains(&algorithm) {
            return Err(Error::UnsupportedAlgorithm);
        }

        let kid = header.kid.ok_or(Error::MalformedToken)?;
        let key = self.key_store.get_key(&kid).await?;
        if key.algorithm().is_some_and(|pinned| pinned != algorithm) {
            return Err(Error::InvalidSignature);
        }

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[expected_issuer]);
        validation.set_audience(&[expected_audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.leeway = self.leeway_secs;

        // `decode` checks the signature before looking at any claim. The payload is decoded untyped so that missing
        // standard claims are reported by the validation instead of failing deserialization.
        let token = decode::<serde_json::Value>(raw_token, key.decoding_key(), &validation)
            .map_err(|err| classify(err.kind()))?;
        serde_json::from_value(token.claims).map_err(|_| Error::MalformedToken)
    }
}

/// Splits the compact serialization and decodes its header without trusting anything in it yet.
fn decode_header(raw_token: &str) -> Result<TokenHeader, Error> {
    let segments: Vec<&str> = raw_token.split('.').collect();
    if segments.len() != 3 || segments.iter().any(|segment| segment.is_empty()) {
        return Err(Error::MalformedToken);
    }
    let header = URL_SAFE_NO_PAD
        .decode(segments[0])
        .map_err(|_| Error::MalformedToken)?;
    serde_json::from_slice(&header).map_err(|_| Error::MalformedToken)
}

fn classify(kind: &ErrorKind) -> Error {
    match kind {
        ErrorKind::ExpiredSignature => Error::TokenExpired,
        ErrorKind::InvalidIssuer => Error::InvalidIssuer,
        ErrorKind::InvalidAudience => Error::InvalidAudience,
        ErrorKind::MissingRequiredClaim(claim) => match claim.as_str() {
            "exp" => Error::TokenExpired,
            "iss" => Error::InvalidIssuer,
            "aud" => Error::InvalidAudience,
            _ => Error::MalformedToken,
        },
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => Error::MalformedToken,
        _ => Error::InvalidSignature,
    }
}
