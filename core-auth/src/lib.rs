//! # Sign-In Module
//!
//! OAuth 2.0 Authorization Code sign-in with PKCE and OpenID Connect ID
//! token verification.
//!
//! ## Overview
//!
//! A host (desktop or mobile app) starts a flow, opens the returned
//! authorization URL in a user agent, captures the redirect and hands it
//! back. The client exchanges the code, verifies the ID token and reports a
//! verified identity both as a return value and as an event.
//!
//! ## Features
//!
//! - PKCE (S256) with per-flow `state` and nonce binding
//! - ID token verification against the provider JWKS, with key rotation
//! - Exactly one terminal event per flow, including cancellation and expiry
//! - Provider endpoints preset for Google or found via OIDC discovery

pub mod callback;
pub mod config;
pub mod discovery;
pub mod error;
pub mod jwks;
pub mod manager;
pub mod oauth;
pub mod token_store;
pub mod types;
pub mod validator;

pub use callback::{CallbackHandler, ExchangeRequest};
pub use config::{ProviderEndpoints, SignInConfig, SignInConfigBuilder};
pub use discovery::discover_provider;
pub use error::{Result, SignInError, SignInErrorKind};
pub use jwks::JwksCache;
pub use manager::SignInClient;
pub use oauth::{code_challenge, generate_nonce, AuthorizationRequestBuilder, PkceVerifier};
pub use token_store::{SweepReport, TokenStore};
pub use types::{CallbackParams, FlowId, FlowStatus, IdentityToken, SignInFlow, TokenResponse};
pub use validator::TokenValidator;
