//! Sign-in configuration.
//!
//! [`SignInConfig`] describes one relying party registration at one identity
//! provider: who we are (`client_id`, `redirect_uri`), what we ask for
//! (`scopes`), where the provider lives ([`ProviderEndpoints`]) and how
//! strict we are about time.

use crate::error::{Result, SignInError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Default lifetime of a pending flow before it is considered abandoned.
pub const DEFAULT_FLOW_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for each token endpoint or JWKS request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default tolerance applied to the ID token `exp` claim.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(5);

/// Authorization parameters set by the client itself.
pub(crate) const RESERVED_PARAMS: &[&str] = &[
    "client_id",
    "redirect_uri",
    "response_type",
    "scope",
    "state",
    "code_challenge",
    "code_challenge_method",
    "nonce",
];

/// Endpoints of an OpenID Connect provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
    /// Expected `iss` claim of ID tokens
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
}

impl ProviderEndpoints {
    pub fn new(
        issuer: impl Into<String>,
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        jwks_uri: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            authorization_endpoint: authorization_endpoint.into(),
            token_endpoint: token_endpoint.into(),
            jwks_uri: jwks_uri.into(),
        }
    }

    /// Google Identity endpoints.
    pub fn google() -> Self {
        Self::new(
            "https://accounts.google.com",
            "https://accounts.google.com/o/oauth2/v2/auth",
            "https://oauth2.googleapis.com/token",
            "https://www.googleapis.com/oauth2/v3/certs",
        )
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.issuer.trim().is_empty() {
            return Err(SignInError::InvalidConfig(
                "Provider issuer cannot be empty".to_string(),
            ));
        }

        for (name, value) in [
            ("authorization_endpoint", &self.authorization_endpoint),
            ("token_endpoint", &self.token_endpoint),
            ("jwks_uri", &self.jwks_uri),
        ] {
            Url::parse(value).map_err(|e| {
                SignInError::InvalidConfig(format!("Invalid {} '{}': {}", name, value, e))
            })?;
        }

        Ok(())
    }
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self::google()
    }
}

/// Relying party configuration for a sign-in flow.
///
/// Build with [`SignInConfig::builder`], which validates the result.
///
/// ```
/// use core_auth::SignInConfig;
///
/// let config = SignInConfig::builder("abc", "app://cb")
///     .scopes(["openid", "email"])
///     .build()
///     .unwrap();
///
/// assert_eq!(config.scopes, vec!["openid", "email"]);
/// ```
#[derive(Clone)]
pub struct SignInConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Only for confidential clients
    pub client_secret: Option<String>,
    pub provider: ProviderEndpoints,
    /// How long a flow may stay pending before it expires
    pub flow_timeout: Duration,
    /// Timeout for each request to the provider
    pub request_timeout: Duration,
    /// Tolerance when checking ID token expiry
    pub clock_skew: Duration,
    /// Bind a random nonce to each flow and require it in the ID token
    pub use_nonce: bool,
    /// Additional authorization parameters (e.g. `prompt`, `login_hint`)
    pub extra_params: Vec<(String, String)>,
}

impl fmt::Debug for SignInConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignInConfig")
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("provider", &self.provider)
            .field("flow_timeout", &self.flow_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("clock_skew", &self.clock_skew)
            .field("use_nonce", &self.use_nonce)
            .field("extra_params", &self.extra_params)
            .finish()
    }
}

impl SignInConfig {
    pub fn builder(
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> SignInConfigBuilder {
        SignInConfigBuilder::new(client_id, redirect_uri)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(SignInError::InvalidConfig(
                "Client id cannot be empty".to_string(),
            ));
        }

        if self.redirect_uri.trim().is_empty() {
            return Err(SignInError::InvalidConfig(
                "Redirect URI cannot be empty".to_string(),
            ));
        }

        Url::parse(&self.redirect_uri).map_err(|e| {
            SignInError::InvalidConfig(format!(
                "Invalid redirect URI '{}': {}",
                self.redirect_uri, e
            ))
        })?;

        if !self.scopes.iter().any(|s| s == "openid") {
            return Err(SignInError::InvalidConfig(
                "Scopes must include 'openid' to receive an ID token".to_string(),
            ));
        }

        if self.scopes.iter().any(|s| s.is_empty() || s.contains(' ')) {
            return Err(SignInError::InvalidConfig(
                "Scopes must be non-empty and contain no spaces".to_string(),
            ));
        }

        if self.flow_timeout.is_zero() {
            return Err(SignInError::InvalidConfig(
                "Flow timeout must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(SignInError::InvalidConfig(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if let Some((name, _)) = self
            .extra_params
            .iter()
            .find(|(name, _)| RESERVED_PARAMS.contains(&name.as_str()))
        {
            return Err(SignInError::InvalidConfig(format!(
                "Authorization parameter '{}' is set by the client and cannot be overridden",
                name
            )));
        }

        self.provider.validate()
    }
}

/// Builder for [`SignInConfig`].
pub struct SignInConfigBuilder {
    config: SignInConfig,
}

impl SignInConfigBuilder {
    fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            config: SignInConfig {
                client_id: client_id.into(),
                redirect_uri: redirect_uri.into(),
                scopes: vec![
                    "openid".to_string(),
                    "email".to_string(),
                    "profile".to_string(),
                ],
                client_secret: None,
                provider: ProviderEndpoints::default(),
                flow_timeout: DEFAULT_FLOW_TIMEOUT,
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
                clock_skew: DEFAULT_CLOCK_SKEW,
                use_nonce: true,
                extra_params: Vec::new(),
            },
        }
    }

    /// Replace the requested scopes. Default: `openid email profile`.
    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.client_secret = Some(secret.into());
        self
    }

    pub fn provider(mut self, provider: ProviderEndpoints) -> Self {
        self.config.provider = provider;
        self
    }

    /// Default: 30 seconds
    pub fn flow_timeout(mut self, timeout: Duration) -> Self {
        self.config.flow_timeout = timeout;
        self
    }

    /// Default: 30 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Default: 5 seconds
    pub fn clock_skew(mut self, skew: Duration) -> Self {
        self.config.clock_skew = skew;
        self
    }

    /// Default: enabled
    pub fn use_nonce(mut self, enabled: bool) -> Self {
        self.config.use_nonce = enabled;
        self
    }

    pub fn extra_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.extra_params.push((name.into(), value.into()));
        self
    }

    /// # Errors
    ///
    /// [`SignInError::InvalidConfig`] describing the first invalid field.
    pub fn build(self) -> Result<SignInConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
