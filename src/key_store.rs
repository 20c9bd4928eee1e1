use std::{
    collections::HashSet,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use jsonwebtoken::{
    jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm, PublicKeyUse},
    Algorithm, DecodingKey,
};
use tokio::sync::Mutex;

use crate::{key_source::KeySource, Error, FetchError};

const MAX_CACHED_KEYS: u64 = 1024;

/// Public key of the identity provider, ready for signature verification.
#[derive(Clone)]
pub struct SigningKey {
    key_id: String,
    algorithm: Option<Algorithm>,
    decoding_key: DecodingKey,
}

impl SigningKey {
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Algorithm the provider pinned for this key, if any.
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

#[derive(thiserror::Error, Debug)]
enum UnusableKey {
    #[error("missing kid")]
    MissingKid,
    #[error("symmetric key material")]
    Symmetric,
    #[error("not a signing key")]
    NotForSigning,
    #[error("invalid key material")]
    InvalidMaterial(#[source] jsonwebtoken::errors::Error),
}

impl SigningKey {
    fn from_jwk(jwk: &Jwk) -> Result<Self, UnusableKey> {
        let key_id = jwk.common.key_id.clone().ok_or(UnusableKey::MissingKid)?;
        if matches!(jwk.algorithm, AlgorithmParameters::OctetKey(_)) {
            return Err(UnusableKey::Symmetric);
        }
        if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
            return Err(UnusableKey::NotForSigning);
        }
        let algorithm = match &jwk.common.key_algorithm {
            Some(key_algorithm) => {
                Some(signing_algorithm(key_algorithm).ok_or(UnusableKey::NotForSigning)?)
            }
            None => None,
        };
        let decoding_key = DecodingKey::from_jwk(jwk).map_err(UnusableKey::InvalidMaterial)?;
        Ok(Self {
            key_id,
            algorithm,
            decoding_key,
        })
    }
}

fn signing_algorithm(key_algorithm: &KeyAlgorithm) -> Option<Algorithm> {
    match key_algorithm {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    }
}

/// Builder for a [`KeyStore`].
pub struct KeyStoreBuilder {
    source: KeySource,
    time_to_live: Option<Duration>,
}

impl KeyStoreBuilder {
    /// Expire cached keys after `time_to_live`. Without it keys stay cached until the next refresh replaces them.
    pub fn with_cache_ttl(mut self, time_to_live: Duration) -> Self {
        self.time_to_live = Some(time_to_live);
        self
    }

    pub fn build(self) -> KeyStore {
        let mut cache = moka::future::Cache::builder().max_capacity(MAX_CACHED_KEYS);
        if let Some(time_to_live) = self.time_to_live {
            cache = cache.time_to_live(time_to_live);
        }
        KeyStore {
            inner: Arc::new(KeyStoreInner {
                keys: cache.build(),
                refresh: Mutex::new(RefreshState {
                    source: self.source,
                    last_failed: false,
                }),
                generation: AtomicU64::new(0),
            }),
        }
    }
}

/// Cache of the identity provider's signing keys, keyed by `kid`.
///
/// Cloning is cheap and clones share the same cache. Concurrent lookups that miss the cache are collapsed into a
/// single fetch of the key set.
#[derive(Clone)]
pub struct KeyStore {
    inner: Arc<KeyStoreInner>,
}

struct KeyStoreInner {
    keys: moka::future::Cache<String, Arc<SigningKey>>,
    refresh: Mutex<RefreshState>,
    /// Incremented after every refresh attempt, successful or not.
    generation: AtomicU64,
}

struct RefreshState {
    source: KeySource,
    last_failed: bool,
}

impl KeyStore {
    pub fn builder(source: impl Into<KeySource>) -> KeyStoreBuilder {
        KeyStoreBuilder {
            source: source.into(),
            time_to_live: None,
        }
    }

    pub fn new(source: impl Into<KeySource>) -> Self {
        Self::builder(source).build()
    }

    /// Looks up the key with the given `kid`, refreshing the key set once on a cache miss.
    pub async fn get_key(&self, key_id: &str) -> Result<Arc<SigningKey>, Error> {
        // The generation must be read before the cache so that a refresh finishing in between is noticed below.
        let observed = self.inner.generation.load(Ordering::Acquire);
        if let Some(key) = self.inner.keys.get(key_id).await {
            return Ok(key);
        }

        let mut refresh = self.inner.refresh.lock().await;
        if self.inner.generation.load(Ordering::Acquire) != observed {
            // Another request refreshed the key set while we were waiting for the lock.
            return match self.inner.keys.get(key_id).await {
                Some(key) => Ok(key),
                None if refresh.last_failed => Err(Error::KeyStoreUnavailable(
                    FetchError::ConcurrentRefreshFailed,
                )),
                None => Err(Error::KeyNotFound),
            };
        }

        tracing::debug!(kid = key_id, "signing key not cached, refreshing key set");
        let fetched = refresh.source.fetch().await;
        let outcome = match fetched {
            Ok(jwk_set) => {
                self.replace_keys(&jwk_set).await;
                refresh.last_failed = false;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to refresh signing keys");
                refresh.last_failed = true;
                Err(Error::KeyStoreUnavailable(err))
            }
        };
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        drop(refresh);
        outcome?;

        self.inner
            .keys
            .get(key_id)
            .await
            .ok_or(Error::KeyNotFound)
    }

    /// Inserts every usable key of `jwk_set` and evicts cached keys the provider no longer publishes.
    async fn replace_keys(&self, jwk_set: &JwkSet) {
        let mut published = HashSet::new();
        for jwk in &jwk_set.keys {
            match SigningKey::from_jwk(jwk) {
                Ok(key) => {
                    published.insert(key.key_id.clone());
                    self.inner
                        .keys
                        .insert(key.key_id.clone(), Arc::new(key))
                        .await;
                }
                Err(reason) => {
                    tracing::warn!(
                        kid = jwk.common.key_id.as_deref().unwrap_or("<none>"),
                        %reason,
                        "skipping unusable key in JWK set"
                    );
                }
            }
        }

        let stale: Vec<Arc<String>> = self
            .inner
            .keys
            .iter()
            .map(|(key_id, _)| key_id)
            .filter(|key_id| !published.contains(key_id.as_str()))
            .collect();
        for key_id in &stale {
            self.inner.keys.invalidate(key_id.as_str()).await;
        }

        tracing::info!(
            keys = published.len(),
            skipped = jwk_set.keys.len() - published.len(),
            evicted = stale.len(),
            "refreshed signing keys"
        );
    }
}
