//! JWKS key cache for OIDC token validation.

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::error::AuthError;

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: String,
    n: String,
    e: String,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    #[serde(default)]
    keys: Vec<Jwk>,
}

/// Fetches and caches the issuer's signing keys.
pub struct JwksCache {
    jwks_url: String,
    http: reqwest::Client,
    keys: RwLock<HashMap<String, Jwk>>,
}

impl JwksCache {
    pub fn new(jwks_url: String) -> Self {
        Self {
            jwks_url,
            http: reqwest::Client::new(),
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Decoding key for the given key ID, refreshing the cache on a miss.
    pub async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(jwk) = self.keys.read().await.get(kid) {
            return Self::to_decoding_key(jwk);
        }

        self.refresh().await?;

        let keys = self.keys.read().await;
        let jwk = keys
            .get(kid)
            .ok_or_else(|| AuthError::InvalidToken(format!("key {kid} not found in JWKS")))?;
        Self::to_decoding_key(jwk)
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        let document: JwksDocument = self
            .http
            .get(&self.jwks_url)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| AuthError::Internal(format!("fetching JWKS: {e}")))?
            .json()
            .await
            .map_err(|e| AuthError::Internal(format!("parsing JWKS: {e}")))?;

        let mut keys = self.keys.write().await;
        keys.clear();
        for jwk in document.keys {
            keys.insert(jwk.kid.clone(), jwk);
        }
        debug!(count = keys.len(), "refreshed JWKS");
        Ok(())
    }

    fn to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, AuthError> {
        DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|e| AuthError::Internal(format!("building decoding key: {e}")))
    }
}
