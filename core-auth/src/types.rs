use crate::config::SignInConfig;
use crate::error::{Result, SignInError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

/// Opaque identifier of one sign-in attempt.
///
/// # Examples
///
/// ```
/// use core_auth::FlowId;
///
/// let id = FlowId::new();
/// let parsed = FlowId::from_string(&id.to_string()).unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(Uuid);

impl FlowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for FlowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for FlowId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Lifecycle of a sign-in flow.
///
/// ```text
/// Pending -> Completed
///         -> Failed
///         -> Expired
/// ```
///
/// The three right-hand states are terminal; nothing leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FlowStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Expired,
}

impl FlowStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FlowStatus::Pending)
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowStatus::Pending => write!(f, "Pending"),
            FlowStatus::Completed => write!(f, "Completed"),
            FlowStatus::Failed => write!(f, "Failed"),
            FlowStatus::Expired => write!(f, "Expired"),
        }
    }
}

/// Transient state of one sign-in attempt.
///
/// Snapshots handed out by the `TokenStore` are copies; mutating one has no
/// effect on the stored flow.
///
/// # Security
///
/// `state`, `code_verifier` and `nonce` are secrets for the lifetime of the
/// flow. The `Debug` implementation redacts them.
#[derive(Clone)]
pub struct SignInFlow {
    pub flow_id: FlowId,
    /// CSRF token echoed back through the redirect
    pub state: String,
    /// PKCE secret, sent only to the token endpoint
    pub code_verifier: String,
    /// `BASE64URL(SHA256(code_verifier))`
    pub code_challenge: String,
    /// OIDC nonce expected in the ID token, when nonce binding is enabled
    pub nonce: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: FlowStatus,
    /// Relying party settings this flow was started with
    pub config: Arc<SignInConfig>,
}

impl SignInFlow {
    pub fn expected_issuer(&self) -> &str {
        &self.config.provider.issuer
    }

    pub fn expected_audience(&self) -> &str {
        &self.config.client_id
    }

    /// Instant after which a pending flow is treated as abandoned.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let timeout = chrono::Duration::from_std(self.config.flow_timeout)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        self.created_at
            .checked_add_signed(timeout)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }
}

impl fmt::Debug for SignInFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignInFlow")
            .field("flow_id", &self.flow_id)
            .field("state", &"[REDACTED]")
            .field("code_verifier", &"[REDACTED]")
            .field("code_challenge", &self.code_challenge)
            .field("nonce", &self.nonce.as_ref().map(|_| "[REDACTED]"))
            .field("created_at", &self.created_at)
            .field("status", &self.status)
            .finish()
    }
}

/// A verified identity extracted from an ID token.
///
/// Only the `TokenValidator` constructs these, after every check passed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityToken {
    /// Stable provider-scoped user id (`sub`)
    pub subject: String,
    /// Empty when the provider did not release it
    pub email: String,
    pub email_verified: bool,
    pub display_name: String,
    pub picture_url: String,
    /// The compact JWT, for handing to a backend that verifies it again
    pub raw_id_token: String,
    pub issuer: String,
    pub audience: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityToken")
            .field("subject", &self.subject)
            .field("email", &self.email)
            .field("email_verified", &self.email_verified)
            .field("display_name", &self.display_name)
            .field("picture_url", &self.picture_url)
            .field("raw_id_token", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Query parameters delivered to the redirect URI.
///
/// ```
/// use core_auth::CallbackParams;
///
/// let params = CallbackParams::from_redirect_url("app://cb?state=xyz&code=4%2F0AX").unwrap();
/// assert_eq!(params.state.as_deref(), Some("xyz"));
/// assert_eq!(params.code.as_deref(), Some("4/0AX"));
/// ```
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// A successful redirect carrying `state` and `code`.
    pub fn new(state: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            state: Some(state.into()),
            code: Some(code.into()),
            ..Self::default()
        }
    }

    /// A redirect where the provider reported an error.
    pub fn denied(
        state: impl Into<String>,
        error: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        Self {
            state: Some(state.into()),
            error: Some(error.into()),
            error_description: description,
            ..Self::default()
        }
    }

    /// Parse a raw query string (without the leading `?`).
    ///
    /// Unknown parameters are ignored.
    pub fn from_query(query: &str) -> Result<Self> {
        serde_urlencoded::from_str(query.trim_start_matches('?')).map_err(|e| {
            SignInError::ProviderDenied {
                error: "invalid_response".to_string(),
                description: Some(format!("Unreadable callback query: {}", e)),
            }
        })
    }

    /// Parse the full redirect URL the host received.
    pub fn from_redirect_url(redirect_url: &str) -> Result<Self> {
        let url = Url::parse(redirect_url).map_err(|e| SignInError::ProviderDenied {
            error: "invalid_response".to_string(),
            description: Some(format!("Unreadable callback URL: {}", e)),
        })?;

        Self::from_query(url.query().unwrap_or_default())
    }
}

impl fmt::Debug for CallbackParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackParams")
            .field("state", &self.state.as_ref().map(|_| "[REDACTED]"))
            .field("code", &self.code.as_ref().map(|_| "[REDACTED]"))
            .field("error", &self.error)
            .field("error_description", &self.error_description)
            .finish()
    }
}

/// Successful token endpoint response.
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

/// OAuth error body returned by the token endpoint (RFC 6749 §5.2).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}
