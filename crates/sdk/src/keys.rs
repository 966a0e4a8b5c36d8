//! Public signing key cache.
//!
//! Keys fetched from the well-known endpoint are cached for the process
//! lifetime and refetched only when a required `kid` is not in the cache.

use std::collections::HashMap;

use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::DecodingKey;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::http;

/// Process-lifetime cache of the identity service's public signing keys.
pub struct PublicKeyCache {
    url: String,
    http: reqwest::Client,
    keys: RwLock<HashMap<String, Jwk>>,
}

impl PublicKeyCache {
    /// Create a cache for the configured tenant's public keys endpoint.
    #[must_use]
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            url: config.public_keys_url(),
            http: http::client(),
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// The decoding key for `kid`, fetching the key set if the id is not yet
    /// cached.
    ///
    /// # Errors
    /// `Error::TokenValidation` when the key set cannot be fetched or parsed,
    /// or when `kid` is absent even after a fresh fetch.
    pub async fn decoding_key(&self, kid: &str) -> Result<DecodingKey> {
        if let Some(jwk) = self.keys.read().await.get(kid) {
            return decoding_key_from_jwk(jwk);
        }

        self.refresh().await?;

        let keys = self.keys.read().await;
        let jwk = keys.get(kid).ok_or_else(|| {
            Error::TokenValidation("Could not find public key for kid".to_string())
        })?;
        decoding_key_from_jwk(jwk)
    }

    async fn refresh(&self) -> Result<()> {
        debug!(url = %self.url, "Fetching public keys");
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|_| Error::TokenValidation("failed to get public key from server".to_string()))?;
        if !response.status().is_success() {
            return Err(Error::TokenValidation(
                "failed to get public key from server".to_string(),
            ));
        }

        let key_set: JwkSet = response.json().await.map_err(|_| {
            Error::TokenValidation("failed to parse public key response from server".to_string())
        })?;

        let mut keys = self.keys.write().await;
        keys.clear();
        for jwk in key_set.keys {
            if let Some(kid) = jwk.common.key_id.clone() {
                keys.insert(kid, jwk);
            }
        }
        Ok(())
    }
}

fn decoding_key_from_jwk(jwk: &Jwk) -> Result<DecodingKey> {
    DecodingKey::from_jwk(jwk).map_err(|_| {
        Error::TokenValidation("failed to parse public key response from server".to_string())
    })
}
