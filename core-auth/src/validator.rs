//! ID token verification.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. Structure: three base64url segments with JSON header and claims
//! 2. Signature against the provider's JWKS (one forced refresh on an
//!    unknown `kid` or bad signature, to follow key rotation; if that
//!    refresh fails the token is still rejected as `SignatureInvalid`)
//! 3. `iss` equals the provider issuer
//! 4. `aud` contains the client id
//! 5. `exp` has not passed, allowing for clock skew
//! 6. `nonce` matches the flow, when the flow carries one
//!
//! Only a token that passes every check becomes an [`IdentityToken`].

use crate::error::{Result, SignInError};
use crate::jwks::JwksCache;
use crate::token_store::TokenStore;
use crate::types::{FlowStatus, IdentityToken, SignInFlow, TokenResponse};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use bridge_traits::Clock;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Header, Validation};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, expected: &str) -> bool {
        match self {
            Audience::One(aud) => aud == expected,
            Audience::Many(auds) => auds.iter().any(|aud| aud == expected),
        }
    }

    fn describe(&self) -> String {
        match self {
            Audience::One(aud) => aud.clone(),
            Audience::Many(auds) => auds.join(","),
        }
    }
}

/// Some providers send `email_verified` as a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    fn as_bool(&self) -> bool {
        match self {
            Flag::Bool(value) => *value,
            Flag::Text(value) => value.eq_ignore_ascii_case("true"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    iss: String,
    sub: String,
    aud: Audience,
    exp: i64,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    nonce: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<Flag>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

enum SignatureCheck {
    Verified,
    /// No key with the token's `kid`, or the signature did not verify
    Retryable(String),
}

pub struct TokenValidator {
    store: TokenStore,
    jwks: Arc<JwksCache>,
    clock: Arc<dyn Clock>,
}

impl TokenValidator {
    pub fn new(store: TokenStore, jwks: Arc<JwksCache>, clock: Arc<dyn Clock>) -> Self {
        Self { store, jwks, clock }
    }

    /// Verify the ID token in `tokens` and mark the flow completed.
    ///
    /// # Errors
    ///
    /// The first failed check, as its own [`SignInError`] variant. If the
    /// flow stopped being pending while the token was checked, returns
    /// [`SignInError::FlowExpired`] or [`SignInError::UnknownFlow`].
    #[instrument(skip_all, fields(flow_id = %flow.flow_id))]
    pub async fn validate(
        &self,
        tokens: &TokenResponse,
        flow: &SignInFlow,
        expected_issuer: &str,
        expected_audience: &str,
    ) -> Result<IdentityToken> {
        let raw = tokens
            .id_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| SignInError::MalformedToken("Token response has no id_token".into()))?;

        let (header, claims) = parse_unverified(raw)?;

        self.verify_signature(raw, &header, flow).await?;

        if claims.iss != expected_issuer {
            warn!(expected = expected_issuer, actual = %claims.iss, "Issuer mismatch");
            return Err(SignInError::IssuerMismatch {
                expected: expected_issuer.to_string(),
                actual: claims.iss,
            });
        }

        if !claims.aud.contains(expected_audience) {
            warn!(expected = expected_audience, "Audience mismatch");
            return Err(SignInError::AudienceMismatch {
                expected: expected_audience.to_string(),
                actual: claims.aud.describe(),
            });
        }

        let now = self.clock.now().timestamp();
        let skew = i64::try_from(flow.config.clock_skew.as_secs()).unwrap_or(i64::MAX);
        if now > claims.exp.saturating_add(skew) {
            return Err(SignInError::TokenExpired {
                expired_at: claims.exp,
                now,
            });
        }

        if let Some(expected_nonce) = flow.nonce.as_deref() {
            if claims.nonce.as_deref() != Some(expected_nonce) {
                warn!("Nonce mismatch");
                return Err(SignInError::NonceMismatch);
            }
        }

        let identity = IdentityToken {
            subject: claims.sub,
            email: claims.email.unwrap_or_default(),
            email_verified: claims
                .email_verified
                .as_ref()
                .is_some_and(Flag::as_bool),
            display_name: claims.name.unwrap_or_default(),
            picture_url: claims.picture.unwrap_or_default(),
            raw_id_token: raw.to_string(),
            issuer: claims.iss,
            audience: expected_audience.to_string(),
            issued_at: timestamp(claims.iat.unwrap_or(now))?,
            expires_at: timestamp(claims.exp)?,
        };

        if !self.store.complete(flow.flow_id).await {
            let status = self
                .store
                .get(flow.flow_id)
                .await
                .map(|flow| flow.status)
                .ok();
            return Err(match status {
                Some(FlowStatus::Expired) => SignInError::FlowExpired {
                    flow_id: flow.flow_id.to_string(),
                },
                _ => SignInError::unknown_flow(flow.flow_id),
            });
        }

        info!(subject = %identity.subject, "ID token verified");
        Ok(identity)
    }

    async fn verify_signature(&self, raw: &str, header: &Header, flow: &SignInFlow) -> Result<()> {
        let provider = &flow.config.provider;
        let timeout = flow.config.request_timeout;

        let keys = self.jwks.get(&provider.jwks_uri, timeout).await?;
        let reason = match check_signature(raw, header, &keys)? {
            SignatureCheck::Verified => return Ok(()),
            SignatureCheck::Retryable(reason) => reason,
        };

        // The token already failed against the cached keys; a failed refresh
        // leaves that failure standing.
        debug!(reason = %reason, "Refreshing signing keys");
        let keys = match self.jwks.refresh(&provider.jwks_uri, timeout).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(reason = %reason, error = %e, "Signing key refresh failed");
                return Err(SignInError::SignatureInvalid(reason));
            }
        };
        match check_signature(raw, header, &keys)? {
            SignatureCheck::Verified => Ok(()),
            SignatureCheck::Retryable(reason) => {
                warn!(reason = %reason, "ID token signature rejected");
                Err(SignInError::SignatureInvalid(reason))
            }
        }
    }
}

fn parse_unverified(raw: &str) -> Result<(Header, IdTokenClaims)> {
    let segments: Vec<&str> = raw.split('.').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(SignInError::MalformedToken(
            "Expected three dot-separated segments".to_string(),
        ));
    }

    let header = decode_header(raw)
        .map_err(|e| SignInError::MalformedToken(format!("Unreadable header: {}", e)))?;

    let payload = URL_SAFE_NO_PAD
        .decode(segments[1])
        .map_err(|e| SignInError::MalformedToken(format!("Claims are not base64url: {}", e)))?;
    let claims = serde_json::from_slice(&payload)
        .map_err(|e| SignInError::MalformedToken(format!("Unreadable claims: {}", e)))?;

    Ok((header, claims))
}

fn check_signature(raw: &str, header: &Header, keys: &JwkSet) -> Result<SignatureCheck> {
    if !is_asymmetric(header.alg) {
        return Err(SignInError::SignatureInvalid(format!(
            "Algorithm {:?} is not accepted",
            header.alg
        )));
    }

    let jwk = match header.kid.as_deref() {
        Some(kid) => keys.find(kid),
        None if keys.keys.len() == 1 => keys.keys.first(),
        None => {
            return Err(SignInError::SignatureInvalid(
                "Token has no kid and the key set is ambiguous".to_string(),
            ))
        }
    };

    let Some(jwk) = jwk else {
        return Ok(SignatureCheck::Retryable(format!(
            "No signing key with kid {:?}",
            header.kid
        )));
    };

    let key = DecodingKey::from_jwk(jwk)
        .map_err(|e| SignInError::SignatureInvalid(format!("Unusable signing key: {}", e)))?;

    let mut validation = Validation::new(header.alg);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    match decode::<serde_json::Value>(raw, &key, &validation) {
        Ok(_) => Ok(SignatureCheck::Verified),
        Err(e) => match e.kind() {
            JwtErrorKind::InvalidSignature => {
                Ok(SignatureCheck::Retryable("Signature does not verify".to_string()))
            }
            JwtErrorKind::InvalidAlgorithm
            | JwtErrorKind::InvalidAlgorithmName
            | JwtErrorKind::InvalidKeyFormat
            | JwtErrorKind::InvalidRsaKey(_)
            | JwtErrorKind::InvalidEcdsaKey => Err(SignInError::SignatureInvalid(e.to_string())),
            _ => Err(SignInError::MalformedToken(e.to_string())),
        },
    }
}

fn is_asymmetric(alg: Algorithm) -> bool {
    !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| SignInError::MalformedToken(format!("Timestamp {} out of range", secs)))
}
