//! JSON Web Key Set fetching and caching.
//!
//! Signing keys are cached per `jwks_uri` for a configurable TTL. Callers
//! that hit an unknown `kid` or a failed signature ask for a forced
//! [`refresh`](JwksCache::refresh) to pick up rotated keys.

use crate::error::{Result, SignInError};
use bridge_traits::http::{HttpClient, HttpRequest, RetryPolicy};
use bridge_traits::{BridgeError, Clock};
use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::JwkSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

/// Attempts per fetch, including the first.
const FETCH_ATTEMPTS: u32 = 2;

struct CachedKeys {
    keys: Arc<JwkSet>,
    fetched_at: DateTime<Utc>,
}

/// Shared cache of provider signing keys.
pub struct JwksCache {
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedKeys>>,
    /// Serializes network fetches so concurrent misses trigger one request
    fetch_lock: Mutex<()>,
}

impl JwksCache {
    pub fn new(http_client: Arc<dyn HttpClient>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            http_client,
            clock,
            ttl,
            entries: RwLock::new(HashMap::new()),
            fetch_lock: Mutex::new(()),
        }
    }

    /// Keys for `jwks_uri`, from cache when fresh.
    ///
    /// # Errors
    ///
    /// [`SignInError::KeyFetchFailure`] if the keys are not cached and cannot
    /// be fetched.
    pub async fn get(&self, jwks_uri: &str, timeout: Duration) -> Result<Arc<JwkSet>> {
        if let Some(keys) = self.cached(jwks_uri).await {
            return Ok(keys);
        }

        let _guard = self.fetch_lock.lock().await;

        // Another task may have fetched while we waited
        if let Some(keys) = self.cached(jwks_uri).await {
            return Ok(keys);
        }

        self.fetch_and_store(jwks_uri, timeout).await
    }

    /// Fetch keys for `jwks_uri`, bypassing the cache.
    pub async fn refresh(&self, jwks_uri: &str, timeout: Duration) -> Result<Arc<JwkSet>> {
        let _guard = self.fetch_lock.lock().await;
        self.fetch_and_store(jwks_uri, timeout).await
    }

    async fn cached(&self, jwks_uri: &str) -> Option<Arc<JwkSet>> {
        let entries = self.entries.read().await;
        let entry = entries.get(jwks_uri)?;

        let age = (self.clock.now() - entry.fetched_at)
            .to_std()
            .unwrap_or_default();
        if age < self.ttl {
            Some(entry.keys.clone())
        } else {
            None
        }
    }

    #[instrument(skip(self, timeout))]
    async fn fetch_and_store(&self, jwks_uri: &str, timeout: Duration) -> Result<Arc<JwkSet>> {
        let keys = Arc::new(self.fetch(jwks_uri, timeout).await?);

        debug!(keys = keys.keys.len(), "Fetched signing keys");

        let mut entries = self.entries.write().await;
        entries.insert(
            jwks_uri.to_string(),
            CachedKeys {
                keys: keys.clone(),
                fetched_at: self.clock.now(),
            },
        );

        Ok(keys)
    }

    async fn fetch(&self, jwks_uri: &str, timeout: Duration) -> Result<JwkSet> {
        let mut last_error = None;

        for attempt in 1..=FETCH_ATTEMPTS {
            match self.fetch_once(jwks_uri, timeout).await {
                Ok(keys) => return Ok(keys),
                Err(e) => {
                    warn!(attempt, error = %e, "Signing key fetch failed");
                    last_error = Some(e);
                }
            }
        }

        Err(SignInError::KeyFetchFailure {
            message: format!("Could not fetch signing keys from {}", jwks_uri),
            source: last_error,
        })
    }

    async fn fetch_once(
        &self,
        jwks_uri: &str,
        timeout: Duration,
    ) -> std::result::Result<JwkSet, BridgeError> {
        let request = HttpRequest::get(jwks_uri).accept_json().timeout(timeout);
        let response = self
            .http_client
            .execute_with_retry(request, RetryPolicy::no_retry())
            .await?;

        if !response.is_success() {
            return Err(BridgeError::OperationFailed(format!(
                "JWKS endpoint returned HTTP {}",
                response.status
            )));
        }

        response.json()
    }
}
