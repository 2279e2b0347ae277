//! Redirect handling and authorization code exchange.
//!
//! [`CallbackHandler::handle_callback`] matches the redirect parameters to a
//! pending flow, and [`CallbackHandler::exchange`] trades the code for tokens
//! at the provider's token endpoint using the flow's PKCE verifier.
//!
//! Neither step moves the flow to a terminal status on failure. The caller
//! that owns the flow (normally `SignInClient`) decides the outcome.

use crate::error::{Result, SignInError};
use crate::token_store::TokenStore;
use crate::types::{CallbackParams, FlowId, SignInFlow, TokenErrorResponse, TokenResponse};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, RetryPolicy};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// A validated callback ready for the token exchange.
#[derive(Clone)]
pub struct ExchangeRequest {
    pub flow: SignInFlow,
    /// Authorization code from the redirect
    pub code: String,
}

impl fmt::Debug for ExchangeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeRequest")
            .field("flow", &self.flow)
            .field("code", &"[REDACTED]")
            .finish()
    }
}

pub struct CallbackHandler {
    store: TokenStore,
    http_client: Arc<dyn HttpClient>,
}

impl CallbackHandler {
    pub fn new(store: TokenStore, http_client: Arc<dyn HttpClient>) -> Self {
        Self { store, http_client }
    }

    /// Match redirect parameters to a pending flow.
    ///
    /// On success the flow is claimed for exchange; later callbacks for the
    /// same flow fail with [`SignInError::UnknownFlow`].
    ///
    /// # Errors
    ///
    /// - [`SignInError::UnknownFlow`] / [`SignInError::FlowExpired`] from the store
    /// - [`SignInError::ProviderDenied`] if the redirect carries `error`, or
    ///   no `code` (reported as `invalid_response`)
    /// - [`SignInError::StateMismatch`] if `state` is missing or differs
    #[instrument(skip(self, params), fields(flow_id = %flow_id))]
    pub async fn handle_callback(
        &self,
        flow_id: FlowId,
        params: &CallbackParams,
    ) -> Result<ExchangeRequest> {
        let flow = self.store.claim(flow_id).await?;

        if let Some(error) = &params.error {
            debug!(error = %error, "Provider reported an error in the redirect");
            return Err(SignInError::ProviderDenied {
                error: error.clone(),
                description: params.error_description.clone(),
            });
        }

        let state_matches = params
            .state
            .as_deref()
            .is_some_and(|state| constant_time_eq(state.as_bytes(), flow.state.as_bytes()));
        if !state_matches {
            warn!("Callback state does not match the flow");
            return Err(SignInError::StateMismatch {
                flow_id: flow_id.to_string(),
            });
        }

        let code = match params.code.as_deref() {
            Some(code) if !code.is_empty() => code.to_string(),
            _ => {
                return Err(SignInError::ProviderDenied {
                    error: "invalid_response".to_string(),
                    description: Some("Redirect carried no authorization code".to_string()),
                })
            }
        };

        Ok(ExchangeRequest { flow, code })
    }

    /// Exchange the authorization code for tokens.
    ///
    /// The request is sent once; a retried exchange would replay a one-time
    /// code.
    ///
    /// # Errors
    ///
    /// - [`SignInError::ProviderDenied`] for an OAuth error response (4xx)
    /// - [`SignInError::NetworkFailure`] for transport errors and 5xx
    /// - [`SignInError::MalformedToken`] if the response has no usable `id_token`
    #[instrument(skip(self, request), fields(flow_id = %request.flow.flow_id))]
    pub async fn exchange(&self, request: &ExchangeRequest) -> Result<TokenResponse> {
        let config = &request.flow.config;

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", request.code.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("client_id", config.client_id.as_str()),
            ("code_verifier", request.flow.code_verifier.as_str()),
        ];
        if let Some(secret) = config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let http_request = HttpRequest::post(config.provider.token_endpoint.as_str())
            .accept_json()
            .timeout(config.request_timeout)
            .form(&form)
            .map_err(|e| SignInError::network("Failed to encode token request", e))?;

        let response = self
            .http_client
            .execute_with_retry(http_request, RetryPolicy::no_retry())
            .await
            .map_err(|e| SignInError::network("Token endpoint request failed", e))?;

        debug!(status = response.status, "Token endpoint responded");
        parse_token_response(&response)
    }
}

fn parse_token_response(response: &HttpResponse) -> Result<TokenResponse> {
    if response.is_client_error() {
        return Err(match response.json::<TokenErrorResponse>() {
            Ok(body) => SignInError::ProviderDenied {
                error: body.error,
                description: body.error_description,
            },
            Err(_) => SignInError::ProviderDenied {
                error: format!("http_{}", response.status),
                description: None,
            },
        });
    }

    if !response.is_success() {
        return Err(SignInError::NetworkFailure {
            message: format!("Token endpoint returned HTTP {}", response.status),
            source: None,
        });
    }

    let tokens: TokenResponse = response
        .json()
        .map_err(|e| SignInError::MalformedToken(format!("Unreadable token response: {}", e)))?;

    match tokens.id_token.as_deref() {
        Some(id_token) if !id_token.is_empty() => Ok(tokens),
        _ => Err(SignInError::MalformedToken(
            "Token response has no id_token".to_string(),
        )),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
