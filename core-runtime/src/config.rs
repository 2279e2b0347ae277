//! # Core Configuration Module
//!
//! Runtime dependencies and tuning knobs for the sign-in core.
//!
//! ## Overview
//!
//! `CoreConfig` is assembled with a builder that validates everything up front.
//! Provider-specific settings (client id, redirect URI, endpoints) live in
//! `core_auth::SignInConfig`; this struct only carries what is shared by every
//! flow in the process.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - token endpoint, JWKS and discovery requests
//!   (desktop default: reqwest, behind the `desktop-shims` feature)
//!
//! ## Optional Dependencies
//!
//! - `Clock` - time source for flow and token expiry (default: system clock)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .http_client(Arc::new(MyHttpClient))
//!     .jwks_cache_ttl(Duration::from_secs(900))
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! Without the `desktop-shims` feature a missing `HttpClient` is reported as
//! [`Error::CapabilityMissing`] with a message telling the host what to inject.

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{Clock, HttpClient, SystemClock};
use std::sync::Arc;
use std::time::Duration;

/// Default lifetime of a cached JSON Web Key Set.
pub const DEFAULT_JWKS_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Default time a finished flow is kept around to reject late callbacks.
pub const DEFAULT_TERMINAL_FLOW_RETENTION: Duration = Duration::from_secs(10 * 60);

const MAX_EVENT_BUFFER_SIZE: usize = 10_000;

/// Process-wide configuration for the sign-in core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// HTTP client used for every provider request
    pub http_client: Arc<dyn HttpClient>,

    /// Time source for flow timeouts and ID token expiry
    pub clock: Arc<dyn Clock>,

    /// Per-subscriber buffer of the event bus
    pub event_buffer_size: usize,

    /// How long fetched signing keys are trusted before a refetch
    pub jwks_cache_ttl: Duration,

    /// How long terminal flows stay in the store before eviction
    pub terminal_flow_retention: Duration,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("http_client", &"HttpClient { ... }")
            .field("clock", &"Clock { ... }")
            .field("event_buffer_size", &self.event_buffer_size)
            .field("jwks_cache_ttl", &self.jwks_cache_ttl)
            .field("terminal_flow_retention", &self.terminal_flow_retention)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer_size > MAX_EVENT_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "Event buffer size {} exceeds maximum of {}",
                self.event_buffer_size, MAX_EVENT_BUFFER_SIZE
            )));
        }

        if self.jwks_cache_ttl.is_zero() {
            return Err(Error::Config(
                "JWKS cache TTL must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "No HttpClient implementation provided. \
                  The sign-in core needs one to reach the token and JWKS endpoints. \
                  Inject one with .http_client() or enable the `desktop-shims` feature."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::new().map_err(|e| Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: format!("Failed to initialize default HttpClient: {}", e),
    })?;

    let client: Arc<dyn HttpClient> = Arc::new(client);
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    http_client: Option<Arc<dyn HttpClient>>,
    clock: Option<Arc<dyn Clock>>,
    event_buffer_size: Option<usize>,
    jwks_cache_ttl: Option<Duration>,
    terminal_flow_retention: Option<Duration>,
}

impl CoreConfigBuilder {
    /// Sets the HTTP client.
    ///
    /// Required unless the `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the time source. Tests inject a `ManualClock` here.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Default: 100 events
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Default: 1 hour
    pub fn jwks_cache_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_cache_ttl = Some(ttl);
        self
    }

    /// Default: 10 minutes
    pub fn terminal_flow_retention(mut self, retention: Duration) -> Self {
        self.terminal_flow_retention = Some(retention);
        self
    }

    /// Builds the final configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when no `HttpClient` is available
    /// - [`Error::Config`] when a value is out of range
    pub fn build(self) -> Result<CoreConfig> {
        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        let config = CoreConfig {
            http_client,
            clock,
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            jwks_cache_ttl: self.jwks_cache_ttl.unwrap_or(DEFAULT_JWKS_CACHE_TTL),
            terminal_flow_retention: self
                .terminal_flow_retention
                .unwrap_or(DEFAULT_TERMINAL_FLOW_RETENTION),
        };

        config.validate()?;

        Ok(config)
    }
}
