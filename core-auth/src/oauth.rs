//! Authorization request construction with PKCE (RFC 7636).
//!
//! # Overview
//!
//! - [`PkceVerifier`] generates the per-flow secrets: the PKCE code verifier,
//!   the CSRF `state` and the OIDC nonce.
//! - [`AuthorizationRequestBuilder`] turns a flow into the URL the host opens
//!   in an external user agent.
//!
//! # Security
//!
//! - All secrets come from the thread-local CSPRNG (`rand::thread_rng`)
//! - Only the S256 challenge method is used; the verifier never leaves the
//!   process except in the token exchange
//! - Secrets are never logged
//!
//! # Example
//!
//! ```
//! use core_auth::oauth::{code_challenge, PkceVerifier};
//!
//! let pkce = PkceVerifier::new();
//! assert_eq!(pkce.challenge(), code_challenge(pkce.verifier()));
//! assert!((43..=128).contains(&pkce.verifier().len()));
//! ```

use crate::config::{ProviderEndpoints, RESERVED_PARAMS};
use crate::error::{Result, SignInError};
use crate::types::SignInFlow;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, instrument};
use url::Url;

/// Random bytes behind the code verifier; encodes to 43 characters.
const VERIFIER_BYTES: usize = 32;
/// Random bytes behind `state` (128 bits).
const STATE_BYTES: usize = 16;
/// Random bytes behind the nonce.
const NONCE_BYTES: usize = 16;

const MIN_VERIFIER_LEN: usize = 43;
const MAX_VERIFIER_LEN: usize = 128;

/// Per-flow PKCE secrets.
///
/// # Security
///
/// The verifier must be kept secret and never sent to the authorization
/// endpoint. Only the challenge derived from it is.
#[derive(Clone)]
pub struct PkceVerifier {
    verifier: String,
    state: String,
}

impl PkceVerifier {
    /// Generate a fresh verifier and state with a cryptographically secure RNG.
    ///
    /// Both values use URL-safe base64 encoding without padding.
    pub fn new() -> Self {
        Self {
            verifier: random_token(VERIFIER_BYTES),
            state: random_token(STATE_BYTES),
        }
    }

    /// Wrap an existing verifier, checking RFC 7636 length and alphabet rules.
    pub fn from_parts(verifier: impl Into<String>, state: impl Into<String>) -> Result<Self> {
        let verifier = verifier.into();

        if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&verifier.len()) {
            return Err(SignInError::InvalidConfig(format!(
                "Code verifier must be {}-{} characters, got {}",
                MIN_VERIFIER_LEN,
                MAX_VERIFIER_LEN,
                verifier.len()
            )));
        }

        if !verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
        {
            return Err(SignInError::InvalidConfig(
                "Code verifier contains characters outside the unreserved set".to_string(),
            ));
        }

        Ok(Self {
            verifier,
            state: state.into(),
        })
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// S256 challenge: `BASE64URL(SHA256(code_verifier))`
    pub fn challenge(&self) -> String {
        code_challenge(&self.verifier)
    }

    pub(crate) fn into_parts(self) -> (String, String) {
        (self.verifier, self.state)
    }
}

impl Default for PkceVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PkceVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkceVerifier")
            .field("verifier", &"[REDACTED]")
            .field("state", &"[REDACTED]")
            .finish()
    }
}

/// Compute the S256 code challenge for `verifier`.
pub fn code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate an OIDC nonce.
pub fn generate_nonce() -> String {
    random_token(NONCE_BYTES)
}

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill(bytes.as_mut_slice());
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Builds provider authorization URLs.
///
/// Pure: the same inputs always yield the same URL.
///
/// ```
/// use core_auth::oauth::AuthorizationRequestBuilder;
/// use core_auth::ProviderEndpoints;
///
/// let builder = AuthorizationRequestBuilder::for_provider(&ProviderEndpoints::google()).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct AuthorizationRequestBuilder {
    authorization_endpoint: Url,
    extra_params: Vec<(String, String)>,
}

impl AuthorizationRequestBuilder {
    pub fn new(authorization_endpoint: &str) -> Result<Self> {
        let authorization_endpoint = Url::parse(authorization_endpoint).map_err(|e| {
            SignInError::InvalidConfig(format!(
                "Invalid authorization endpoint '{}': {}",
                authorization_endpoint, e
            ))
        })?;

        Ok(Self {
            authorization_endpoint,
            extra_params: Vec::new(),
        })
    }

    pub fn for_provider(provider: &ProviderEndpoints) -> Result<Self> {
        Self::new(&provider.authorization_endpoint)
    }

    /// Append provider-specific parameters after the standard ones.
    pub fn with_extra_params(mut self, params: &[(String, String)]) -> Result<Self> {
        if let Some((name, _)) = params
            .iter()
            .find(|(name, _)| RESERVED_PARAMS.contains(&name.as_str()))
        {
            return Err(SignInError::InvalidConfig(format!(
                "Authorization parameter '{}' cannot be overridden",
                name
            )));
        }

        self.extra_params.extend(params.iter().cloned());
        Ok(self)
    }

    /// Assemble the authorization URL for `flow`.
    ///
    /// The code challenge is recomputed from the flow's verifier, and the
    /// nonce is included when the flow has one.
    ///
    /// # Errors
    ///
    /// [`SignInError::InvalidConfig`] if `client_id` or `redirect_uri` is empty.
    #[instrument(skip(self, scopes, flow), fields(flow_id = %flow.flow_id))]
    pub fn build(
        &self,
        client_id: &str,
        redirect_uri: &str,
        scopes: &[String],
        flow: &SignInFlow,
    ) -> Result<Url> {
        if client_id.trim().is_empty() {
            return Err(SignInError::InvalidConfig(
                "Client id cannot be empty".to_string(),
            ));
        }

        if redirect_uri.trim().is_empty() {
            return Err(SignInError::InvalidConfig(
                "Redirect URI cannot be empty".to_string(),
            ));
        }

        let challenge = code_challenge(&flow.code_verifier);
        let mut url = self.authorization_endpoint.clone();

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", client_id);
            query.append_pair("redirect_uri", redirect_uri);
            query.append_pair("response_type", "code");
            query.append_pair("code_challenge_method", "S256");
            query.append_pair("scope", &scopes.join(" "));
            query.append_pair("state", &flow.state);
            query.append_pair("code_challenge", &challenge);
            if let Some(nonce) = &flow.nonce {
                query.append_pair("nonce", nonce);
            }
            for (name, value) in &self.extra_params {
                query.append_pair(name, value);
            }
        }

        debug!(
            endpoint = %self.authorization_endpoint,
            nonce_bound = flow.nonce.is_some(),
            "Built authorization URL"
        );

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SignInConfig;
    use crate::types::{FlowId, FlowStatus};
    use chrono::Utc;
    use std::sync::Arc;

    fn flow(verifier: &str, nonce: Option<&str>) -> SignInFlow {
        let config = SignInConfig::builder("abc", "app://cb").build().unwrap();
        SignInFlow {
            flow_id: FlowId::new(),
            state: "st4te".to_string(),
            code_verifier: verifier.to_string(),
            code_challenge: code_challenge(verifier),
            nonce: nonce.map(str::to_string),
            created_at: Utc::now(),
            status: FlowStatus::Pending,
            config: Arc::new(config),
        }
    }

    fn scopes() -> Vec<String> {
        vec!["openid".to_string(), "email".to_string()]
    }

    #[test]
    fn test_pkce_verifier_generation() {
        let pkce = PkceVerifier::new();

        assert_eq!(pkce.verifier().len(), 43);
        assert!(pkce.state().len() >= 22);
        assert_eq!(pkce.challenge(), pkce.challenge());

        let other = PkceVerifier::new();
        assert_ne!(pkce.verifier(), other.verifier());
        assert_ne!(pkce.state(), other.state());
    }

    #[test]
    fn test_pkce_challenge_known_vector() {
        // RFC 7636 Appendix B
        let pkce =
            PkceVerifier::from_parts("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk", "s").unwrap();
        assert_eq!(
            pkce.challenge(),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_pkce_verifier_length_bounds() {
        assert!(PkceVerifier::from_parts("a".repeat(42), "s").is_err());
        assert!(PkceVerifier::from_parts("a".repeat(43), "s").is_ok());
        assert!(PkceVerifier::from_parts("a".repeat(128), "s").is_ok());
        assert!(PkceVerifier::from_parts("a".repeat(129), "s").is_err());
        assert!(PkceVerifier::from_parts(format!("{}+", "a".repeat(43)), "s").is_err());
    }

    #[test]
    fn test_nonce_generation() {
        let n1 = generate_nonce();
        let n2 = generate_nonce();
        assert_ne!(n1, n2);
        assert!(!n1.contains('='));
    }

    #[test]
    fn test_build_auth_url_parameter_order() {
        let builder = AuthorizationRequestBuilder::new("https://issuer.example/authorize").unwrap();
        let flow = flow("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk", None);

        let url = builder.build("abc", "app://cb", &scopes(), &flow).unwrap();
        let url = url.as_str();

        assert!(url.starts_with("https://issuer.example/authorize?"));
        assert!(url.contains(
            "client_id=abc&redirect_uri=app%3A%2F%2Fcb&response_type=code&code_challenge_method=S256"
        ));
        assert!(url.contains("scope=openid+email"));
        assert!(url.contains("state=st4te"));
        assert!(url.contains("code_challenge=E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"));
        assert!(!url.contains("nonce="));
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = AuthorizationRequestBuilder::new("https://issuer.example/authorize").unwrap();
        let flow = flow(&"v".repeat(43), Some("n0nce"));

        let first = builder.build("abc", "app://cb", &scopes(), &flow).unwrap();
        let second = builder.build("abc", "app://cb", &scopes(), &flow).unwrap();
        assert_eq!(first, second);
        assert!(first.as_str().contains("nonce=n0nce"));
    }

    #[test]
    fn test_build_rejects_empty_client_or_redirect() {
        let builder = AuthorizationRequestBuilder::new("https://issuer.example/authorize").unwrap();
        let flow = flow(&"v".repeat(43), None);

        assert!(matches!(
            builder.build("", "app://cb", &scopes(), &flow),
            Err(SignInError::InvalidConfig(_))
        ));
        assert!(matches!(
            builder.build("abc", " ", &scopes(), &flow),
            Err(SignInError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_extra_params_follow_standard_ones() {
        let builder = AuthorizationRequestBuilder::new("https://issuer.example/authorize")
            .unwrap()
            .with_extra_params(&[("prompt".to_string(), "select_account".to_string())])
            .unwrap();
        let flow = flow(&"v".repeat(43), None);

        let url = builder.build("abc", "app://cb", &scopes(), &flow).unwrap();
        assert!(url.as_str().ends_with("&prompt=select_account"));
    }

    #[test]
    fn test_extra_params_cannot_override_reserved() {
        let result = AuthorizationRequestBuilder::new("https://issuer.example/authorize")
            .unwrap()
            .with_extra_params(&[("code_challenge_method".to_string(), "plain".to_string())]);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(AuthorizationRequestBuilder::new("not a valid url").is_err());
    }
}
