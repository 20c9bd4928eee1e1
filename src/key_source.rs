use jsonwebtoken::jwk::JwkSet;

use crate::{remote_jwk_set::RemoteJwkSet, FetchError};

/// Where the key store obtains signing keys: a [`RemoteJwkSet`] or a local [`jsonwebtoken::jwk::JwkSet`].
#[derive(Clone, Debug)]
pub enum KeySource {
    Local(JwkSet),
    Remote(RemoteJwkSet),
}

impl KeySource {
    pub async fn fetch(&mut self) -> Result<JwkSet, FetchError> {
        match self {
            KeySource::Local(local_jwk_set) => Ok(local_jwk_set.clone()),
            KeySource::Remote(remote_jwk_set) => remote_jwk_set.jwk_set().await,
        }
    }
}

impl From<JwkSet> for KeySource {
    fn from(jwk_set: JwkSet) -> Self {
        KeySource::Local(jwk_set)
    }
}

impl From<RemoteJwkSet> for KeySource {
    fn from(remote_jwk_set: RemoteJwkSet) -> Self {
        KeySource::Remote(remote_jwk_set)
    }
}
