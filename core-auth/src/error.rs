use bridge_traits::BridgeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Every way a sign-in flow can fail.
///
/// All variants are terminal for the flow that produced them. Security check
/// failures are reported as their own variants and never folded into a
/// generic error, see [`SignInError::is_security_violation`].
#[derive(Error, Debug)]
pub enum SignInError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown or finished sign-in flow: {flow_id}")]
    UnknownFlow { flow_id: String },

    #[error("Sign-in flow {flow_id} expired")]
    FlowExpired { flow_id: String },

    #[error("Provider denied sign-in: {}", describe_denial(.error, .description.as_deref()))]
    ProviderDenied {
        error: String,
        description: Option<String>,
    },

    #[error("Callback state does not match flow {flow_id}")]
    StateMismatch { flow_id: String },

    #[error("Malformed ID token: {0}")]
    MalformedToken(String),

    #[error("ID token signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("ID token issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch { expected: String, actual: String },

    #[error("ID token audience mismatch: expected {expected}, got {actual}")]
    AudienceMismatch { expected: String, actual: String },

    #[error("ID token expired at {expired_at} (now {now})")]
    TokenExpired { expired_at: i64, now: i64 },

    #[error("ID token nonce does not match the flow")]
    NonceMismatch,

    #[error("Network failure: {message}")]
    NetworkFailure {
        message: String,
        #[source]
        source: Option<BridgeError>,
    },

    #[error("Failed to fetch signing keys: {message}")]
    KeyFetchFailure {
        message: String,
        #[source]
        source: Option<BridgeError>,
    },
}

fn describe_denial(error: &str, description: Option<&str>) -> String {
    match description {
        Some(description) if !description.is_empty() => format!("{} ({})", error, description),
        _ => error.to_string(),
    }
}

impl SignInError {
    pub fn kind(&self) -> SignInErrorKind {
        match self {
            SignInError::InvalidConfig(_) => SignInErrorKind::InvalidConfig,
            SignInError::UnknownFlow { .. } => SignInErrorKind::UnknownFlow,
            SignInError::FlowExpired { .. } => SignInErrorKind::FlowExpired,
            SignInError::ProviderDenied { .. } => SignInErrorKind::ProviderDenied,
            SignInError::StateMismatch { .. } => SignInErrorKind::StateMismatch,
            SignInError::MalformedToken(_) => SignInErrorKind::MalformedToken,
            SignInError::SignatureInvalid(_) => SignInErrorKind::SignatureInvalid,
            SignInError::IssuerMismatch { .. } => SignInErrorKind::IssuerMismatch,
            SignInError::AudienceMismatch { .. } => SignInErrorKind::AudienceMismatch,
            SignInError::TokenExpired { .. } => SignInErrorKind::TokenExpired,
            SignInError::NonceMismatch => SignInErrorKind::NonceMismatch,
            SignInError::NetworkFailure { .. } => SignInErrorKind::NetworkFailure,
            SignInError::KeyFetchFailure { .. } => SignInErrorKind::KeyFetchFailure,
        }
    }

    /// True when a security check failed. Callers should not offer a silent retry.
    pub fn is_security_violation(&self) -> bool {
        self.kind().is_security_violation()
    }

    /// True for failures where starting a fresh flow may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            SignInErrorKind::NetworkFailure
                | SignInErrorKind::KeyFetchFailure
                | SignInErrorKind::FlowExpired
        )
    }

    pub(crate) fn network(message: impl Into<String>, source: BridgeError) -> Self {
        SignInError::NetworkFailure {
            message: message.into(),
            source: Some(source),
        }
    }

    pub(crate) fn unknown_flow(flow_id: impl ToString) -> Self {
        SignInError::UnknownFlow {
            flow_id: flow_id.to_string(),
        }
    }
}

/// Stable discriminant of [`SignInError`], used in events and for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignInErrorKind {
    InvalidConfig,
    UnknownFlow,
    FlowExpired,
    ProviderDenied,
    StateMismatch,
    MalformedToken,
    SignatureInvalid,
    IssuerMismatch,
    AudienceMismatch,
    TokenExpired,
    NonceMismatch,
    NetworkFailure,
    KeyFetchFailure,
}

impl SignInErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignInErrorKind::InvalidConfig => "InvalidConfig",
            SignInErrorKind::UnknownFlow => "UnknownFlow",
            SignInErrorKind::FlowExpired => "FlowExpired",
            SignInErrorKind::ProviderDenied => "ProviderDenied",
            SignInErrorKind::StateMismatch => "StateMismatch",
            SignInErrorKind::MalformedToken => "MalformedToken",
            SignInErrorKind::SignatureInvalid => "SignatureInvalid",
            SignInErrorKind::IssuerMismatch => "IssuerMismatch",
            SignInErrorKind::AudienceMismatch => "AudienceMismatch",
            SignInErrorKind::TokenExpired => "TokenExpired",
            SignInErrorKind::NonceMismatch => "NonceMismatch",
            SignInErrorKind::NetworkFailure => "NetworkFailure",
            SignInErrorKind::KeyFetchFailure => "KeyFetchFailure",
        }
    }

    pub fn is_security_violation(&self) -> bool {
        matches!(
            self,
            SignInErrorKind::StateMismatch
                | SignInErrorKind::SignatureInvalid
                | SignInErrorKind::IssuerMismatch
                | SignInErrorKind::AudienceMismatch
                | SignInErrorKind::NonceMismatch
        )
    }
}

impl fmt::Display for SignInErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Result<T> = std::result::Result<T, SignInError>;
