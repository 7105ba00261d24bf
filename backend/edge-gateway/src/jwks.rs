/// JWKS (JSON Web Key Set) key store
///
/// Holds the RSA public keys published by the identity provider, indexed by
/// `kid`. The whole key set is swapped in one step on every successful
/// refresh, so readers see either the old set or the new one.
///
/// Lookup rules:
/// - a cached key younger than the TTL is served without network traffic
/// - an expired cache or an unknown `kid` triggers a refresh
/// - an unknown `kid` after a normal refresh gets exactly one forced retry
/// - if the fetch fails the previous key set is kept and served as stale
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::DecodingKey;
use parking_lot::RwLock;
use resilience::{with_deadline_result, TimeoutError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// JWKS key entry (subset of RFC 7517)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kid: Option<String>,
    pub kty: String,
    pub alg: Option<String>,
    #[serde(rename = "use")]
    pub use_: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
}

/// JWKS document as served by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    #[error("JWKS fetch failed: {0}")]
    Fetch(String),

    #[error("JWKS endpoint returned status {0}")]
    Status(u16),

    #[error("JWKS document could not be decoded: {0}")]
    Decode(String),

    #[error("JWKS fetch deadline exceeded")]
    Timeout,

    #[error("signing key not found: {0}")]
    KeyNotFound(String),
}

/// Where JWKS documents come from
#[async_trait]
pub trait JwksSource: Send + Sync {
    async fn fetch(&self, deadline: Instant) -> Result<JwkSet, JwksError>;
}

/// Fetches the JWKS document over HTTP
pub struct HttpJwksSource {
    client: reqwest::Client,
    url: String,
}

impl HttpJwksSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, JwksError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| JwksError::Fetch(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl JwksSource for HttpJwksSource {
    async fn fetch(&self, deadline: Instant) -> Result<JwkSet, JwksError> {
        let request = async {
            let response = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| JwksError::Fetch(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(JwksError::Status(status.as_u16()));
            }

            response
                .json::<JwkSet>()
                .await
                .map_err(|e| JwksError::Decode(e.to_string()))
        };

        match with_deadline_result(deadline, request).await {
            Ok(set) => Ok(set),
            Err(TimeoutError::Elapsed) => Err(JwksError::Timeout),
            Err(TimeoutError::OperationFailed(e)) => Err(e),
        }
    }
}

/// A resolved verification key
#[derive(Clone)]
pub struct ResolvedKey {
    pub key: Arc<DecodingKey>,
    /// True when the key came from a cache older than the TTL because the
    /// refresh failed
    pub stale: bool,
}

#[derive(Default)]
struct KeySet {
    keys: HashMap<String, Arc<DecodingKey>>,
    fetched_at: Option<Instant>,
}

impl KeySet {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at
            .map(|at| at.elapsed() < ttl)
            .unwrap_or(false)
    }
}

pub struct KeyStore {
    source: Arc<dyn JwksSource>,
    ttl: Duration,
    fetch_timeout: Duration,
    current: RwLock<Arc<KeySet>>,
}

impl KeyStore {
    pub fn new(source: Arc<dyn JwksSource>, ttl: Duration, fetch_timeout: Duration) -> Self {
        Self {
            source,
            ttl,
            fetch_timeout,
            current: RwLock::new(Arc::new(KeySet::default())),
        }
    }

    fn snapshot(&self) -> Arc<KeySet> {
        self.current.read().clone()
    }

    /// Number of keys currently cached
    pub fn key_count(&self) -> usize {
        self.snapshot().keys.len()
    }

    /// Resolve the key for `kid`, refreshing the key set when needed
    pub async fn lookup_key(
        &self,
        kid: &str,
        force_refresh: bool,
        deadline: Instant,
    ) -> Result<ResolvedKey, JwksError> {
        let mut force_refresh = force_refresh;

        loop {
            let cached = self.snapshot();
            if !force_refresh && cached.is_fresh(self.ttl) {
                if let Some(key) = cached.keys.get(kid) {
                    return Ok(ResolvedKey {
                        key: key.clone(),
                        stale: false,
                    });
                }
            }

            let refreshed = match self.refresh(deadline).await {
                Ok(_) => true,
                Err(e) => {
                    error!(error = %e, kid = %kid, "JWKS refresh failed, keeping previous key set");
                    false
                }
            };

            let current = self.snapshot();
            if let Some(key) = current.keys.get(kid) {
                let stale = !refreshed && !current.is_fresh(self.ttl);
                if stale {
                    warn!(kid = %kid, "Serving signing key from stale JWKS cache");
                }
                return Ok(ResolvedKey {
                    key: key.clone(),
                    stale,
                });
            }

            if force_refresh {
                return Err(JwksError::KeyNotFound(kid.to_string()));
            }
            debug!(kid = %kid, "Key not in refreshed set, forcing one more refresh");
            force_refresh = true;
        }
    }

    /// Fetch the JWKS document and replace the cached key set.
    ///
    /// Returns the number of usable keys loaded. On failure the previous key
    /// set is left in place.
    pub async fn refresh(&self, deadline: Instant) -> Result<usize, JwksError> {
        let deadline = deadline.min(Instant::now() + self.fetch_timeout);
        let document = self.source.fetch(deadline).await?;

        let mut keys = HashMap::with_capacity(document.keys.len());
        for jwk in &document.keys {
            match decode_jwk(jwk) {
                Ok((kid, key)) => {
                    keys.insert(kid, Arc::new(key));
                }
                Err(reason) => {
                    warn!(kid = ?jwk.kid, reason = %reason, "Skipping unusable JWKS entry");
                }
            }
        }

        let count = keys.len();
        *self.current.write() = Arc::new(KeySet {
            keys,
            fetched_at: Some(Instant::now()),
        });

        info!(key_count = count, "JWKS refreshed");
        Ok(count)
    }
}

fn decode_jwk(jwk: &Jwk) -> Result<(String, DecodingKey), String> {
    let kid = jwk.kid.clone().ok_or_else(|| "missing kid".to_string())?;

    if jwk.kty != "RSA" {
        return Err(format!("unsupported key type {}", jwk.kty));
    }

    let n = jwk.n.as_deref().ok_or_else(|| "missing modulus".to_string())?;
    let e = jwk.e.as_deref().ok_or_else(|| "missing exponent".to_string())?;

    let modulus = URL_SAFE_NO_PAD
        .decode(n)
        .map_err(|err| format!("invalid modulus encoding: {}", err))?;
    let exponent = URL_SAFE_NO_PAD
        .decode(e)
        .map_err(|err| format!("invalid exponent encoding: {}", err))?;

    Ok((kid, DecodingKey::from_rsa_raw_components(&modulus, &exponent)))
}
