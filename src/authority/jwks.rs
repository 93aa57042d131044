// JWKS cache for the authority's ID-token signing keys

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use log::debug;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};

use super::AuthorityError;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonWebKey {
    pub kty: String,
    pub kid: Option<String>,
    pub alg: Option<String>,
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
}

impl JsonWebKey {
    /// Build the RSA public key from the base64url modulus and exponent
    ///
    /// # Errors
    ///
    /// Returns an `auth/argument-error` if a component is missing or malformed
    pub fn to_rsa_public_key(&self) -> Result<RsaPublicKey, AuthorityError> {
        let n = self
            .n
            .as_deref()
            .ok_or_else(|| AuthorityError::argument("Missing RSA modulus (n)"))?;
        let e = self
            .e
            .as_deref()
            .ok_or_else(|| AuthorityError::argument("Missing RSA exponent (e)"))?;

        let n_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(n)
            .map_err(|e| AuthorityError::argument(format!("Invalid modulus encoding: {e}")))?;
        let e_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(e)
            .map_err(|e| AuthorityError::argument(format!("Invalid exponent encoding: {e}")))?;

        RsaPublicKey::new(
            BigUint::from_bytes_be(&n_bytes),
            BigUint::from_bytes_be(&e_bytes),
        )
        .map_err(|e| AuthorityError::argument(format!("Invalid RSA key: {e}")))
    }
}

pub struct JwksCache {
    // Key ID -> JsonWebKey
    keys: HashMap<String, JsonWebKey>,
    last_updated: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    cache_duration: Duration,
    retry_backoff: Duration,
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}

impl JwksCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
            last_updated: None,
            last_failure: None,
            cache_duration: Duration::from_secs(3600),
            retry_backoff: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub const fn with_cache_duration(mut self, duration: Duration) -> Self {
        self.cache_duration = duration;
        self
    }

    #[must_use]
    pub fn is_cache_valid(&self) -> bool {
        self.last_updated.is_some_and(|last_updated| {
            let elapsed = Utc::now().signed_duration_since(last_updated);
            elapsed.to_std().unwrap_or(Duration::MAX) < self.cache_duration
        })
    }

    /// Whether enough time has passed since the last failed fetch
    #[must_use]
    pub fn should_retry_fetch(&self) -> bool {
        let Some(last_failed) = self.last_failure else {
            return true;
        };
        let elapsed = Utc::now().signed_duration_since(last_failed);
        elapsed.to_std().unwrap_or(Duration::MAX) >= self.retry_backoff
    }

    #[must_use]
    pub fn get_key(&self, kid: &str) -> Option<&JsonWebKey> {
        self.keys.get(kid)
    }

    /// Replace the cached key set; keys without a `kid` cannot be selected and are dropped
    pub fn store_keys(&mut self, keys: Vec<JsonWebKey>) {
        self.keys = keys
            .into_iter()
            .filter_map(|key| key.kid.clone().map(|kid| (kid, key)))
            .collect();
        debug!("💾 Cached {} ID-token signing keys", self.keys.len());
        self.last_updated = Some(Utc::now());
        self.last_failure = None;
    }

    pub fn record_fetch_failure(&mut self) {
        self.last_failure = Some(Utc::now());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
