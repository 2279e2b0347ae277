//! OIDC provider discovery via the `.well-known` document.

use crate::config::ProviderEndpoints;
use crate::error::{Result, SignInError};
use bridge_traits::http::{HttpClient, HttpRequest};
use serde::Deserialize;
use tracing::{info, instrument};

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    jwks_uri: String,
}

/// Fetch `{issuer}/.well-known/openid-configuration` and return the
/// provider's endpoints.
///
/// # Errors
///
/// - [`SignInError::NetworkFailure`] if the document cannot be fetched
/// - [`SignInError::InvalidConfig`] if it is unreadable, its endpoints are
///   invalid, or it names a different issuer
#[instrument(skip(http))]
pub async fn discover_provider(http: &dyn HttpClient, issuer: &str) -> Result<ProviderEndpoints> {
    let url = format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    );

    let response = http
        .execute(HttpRequest::get(url).accept_json())
        .await
        .map_err(|e| SignInError::network("Discovery request failed", e))?;

    if !response.is_success() {
        return Err(SignInError::NetworkFailure {
            message: format!("Discovery endpoint returned HTTP {}", response.status),
            source: None,
        });
    }

    let document: DiscoveryDocument = response
        .json()
        .map_err(|e| SignInError::InvalidConfig(format!("Unreadable discovery document: {}", e)))?;

    if document.issuer != issuer {
        return Err(SignInError::InvalidConfig(format!(
            "Discovery document names issuer {} instead of {}",
            document.issuer, issuer
        )));
    }

    let endpoints = ProviderEndpoints::new(
        document.issuer,
        document.authorization_endpoint,
        document.token_endpoint,
        document.jwks_uri,
    );
    endpoints.validate()?;

    info!("Discovered provider endpoints");
    Ok(endpoints)
}
