//! # Sign-In Client
//!
//! Facade over the whole Authorization Code + PKCE sign-in.
//!
//! ## Overview
//!
//! [`SignInClient`] creates flows, hands the host an authorization URL to
//! open, and turns the redirect the host captures back into a verified
//! [`IdentityToken`]. Every flow ends with exactly one terminal event
//! (`LoginSuccess` or `LoginError`) on the event bus.
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{CallbackParams, SignInClient, SignInConfig};
//! use core_runtime::config::CoreConfig;
//!
//! # async fn example(core: CoreConfig) -> Result<(), Box<dyn std::error::Error>> {
//! let client = SignInClient::new(&core);
//! let mut events = client.subscribe();
//!
//! let config = SignInConfig::builder("my-client-id", "com.example.app:/oauth2redirect").build()?;
//! let (flow_id, url) = client.begin_sign_in(config).await?;
//! println!("Open {}", url);
//!
//! // The host captures the redirect and hands it back
//! let params = CallbackParams::from_redirect_url("com.example.app:/oauth2redirect?state=..&code=..")?;
//! let identity = client.complete_sign_in(flow_id, params).await?;
//! println!("Signed in as {}", identity.subject);
//! # let _ = events.recv().await;
//! # Ok(())
//! # }
//! ```

use crate::callback::{CallbackHandler, ExchangeRequest};
use crate::config::SignInConfig;
use crate::error::{Result, SignInError, SignInErrorKind};
use crate::jwks::JwksCache;
use crate::oauth::AuthorizationRequestBuilder;
use crate::token_store::TokenStore;
use crate::types::{CallbackParams, FlowId, FlowStatus, IdentityToken};
use crate::validator::TokenValidator;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, EventStream, RawIdToken, SignInEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Sign-in orchestrator.
///
/// Safe to share across tasks; callbacks for different flows may complete
/// concurrently.
pub struct SignInClient {
    store: TokenStore,
    callbacks: CallbackHandler,
    validator: TokenValidator,
    jwks: Arc<JwksCache>,
    events: EventEmitter,
    retention: Duration,
}

impl SignInClient {
    /// Creates a client with its own event bus sized from `core`.
    pub fn new(core: &CoreConfig) -> Self {
        Self::with_event_bus(core, EventBus::new(core.event_buffer_size))
    }

    /// Creates a client publishing into an existing event bus.
    pub fn with_event_bus(core: &CoreConfig, event_bus: EventBus) -> Self {
        let store = TokenStore::new(core.clock.clone());
        let jwks = Arc::new(JwksCache::new(
            core.http_client.clone(),
            core.clock.clone(),
            core.jwks_cache_ttl,
        ));

        Self {
            callbacks: CallbackHandler::new(store.clone(), core.http_client.clone()),
            validator: TokenValidator::new(store.clone(), jwks.clone(), core.clock.clone()),
            store,
            jwks,
            events: EventEmitter { bus: event_bus },
            retention: core.terminal_flow_retention,
        }
    }

    /// Start a sign-in flow.
    ///
    /// Also sweeps the store: pending flows past their timeout are expired
    /// and terminal flows older than the retention window are evicted.
    ///
    /// Returns the flow id and the authorization URL the host must open in a
    /// user agent. The redirect that follows is passed to
    /// [`complete_sign_in`](Self::complete_sign_in).
    ///
    /// # Errors
    ///
    /// [`SignInError::InvalidConfig`] if `config` does not validate.
    #[instrument(skip(self, config))]
    pub async fn begin_sign_in(
        &self,
        config: impl Into<Arc<SignInConfig>>,
    ) -> Result<(FlowId, Url)> {
        let config: Arc<SignInConfig> = config.into();
        config.validate()?;

        let builder = AuthorizationRequestBuilder::for_provider(&config.provider)?
            .with_extra_params(&config.extra_params)?;

        // Finished flows are evicted here so a host that never runs the
        // sweeper does not accumulate them.
        sweep(&self.store, &self.events, self.retention).await;

        let flow = self.store.create(config.clone()).await;
        let url = match builder.build(&config.client_id, &config.redirect_uri, &config.scopes, &flow)
        {
            Ok(url) => url,
            Err(e) => {
                self.store.fail(flow.flow_id, e.kind().as_str()).await;
                return Err(e);
            }
        };

        info!(flow_id = %flow.flow_id, issuer = %config.provider.issuer, "Sign-in flow started");
        self.events.emit(SignInEvent::Started {
            flow_id: flow.flow_id.to_string(),
            issuer: config.provider.issuer.clone(),
        });

        Ok((flow.flow_id, url))
    }

    /// Finish a flow with the parameters of the redirect the host captured.
    ///
    /// The token exchange and ID token verification together are bounded by
    /// the flow's request timeout; running out of time expires the flow.
    ///
    /// # Errors
    ///
    /// Any [`SignInError`]. Every error except `UnknownFlow` also moves the
    /// flow to a terminal status and emits `LoginError`.
    #[instrument(skip(self, params), fields(flow_id = %flow_id))]
    pub async fn complete_sign_in(
        &self,
        flow_id: FlowId,
        params: CallbackParams,
    ) -> Result<IdentityToken> {
        let request = match self.callbacks.handle_callback(flow_id, &params).await {
            Ok(request) => request,
            Err(e) => return Err(self.finish_with_error(flow_id, e).await),
        };

        self.events.emit(SignInEvent::Debug {
            flow_id: Some(flow_id.to_string()),
            message: "Exchanging authorization code".to_string(),
        });

        let limit = request.flow.config.request_timeout;
        let outcome = tokio::time::timeout(limit, self.exchange_and_validate(&request))
            .await
            .unwrap_or_else(|_| {
                warn!(timeout = ?limit, "Token exchange timed out");
                Err(SignInError::FlowExpired {
                    flow_id: flow_id.to_string(),
                })
            });

        match outcome {
            Ok(identity) => {
                info!(subject = %identity.subject, "Sign-in completed");
                self.events.emit(SignInEvent::LoginSuccess {
                    flow_id: flow_id.to_string(),
                    subject: identity.subject.clone(),
                    email: identity.email.clone(),
                    display_name: identity.display_name.clone(),
                    picture_url: identity.picture_url.clone(),
                    id_token: RawIdToken::new(identity.raw_id_token.clone()),
                });
                Ok(identity)
            }
            Err(e) => Err(self.finish_with_error(flow_id, e).await),
        }
    }

    /// Abandon a pending flow. Returns `false` if it was not pending.
    #[instrument(skip(self), fields(flow_id = %flow_id))]
    pub async fn cancel_sign_in(&self, flow_id: FlowId) -> bool {
        if !self.store.fail(flow_id, "cancelled").await {
            return false;
        }

        info!("Sign-in flow cancelled");
        self.events.login_error(
            flow_id,
            &SignInError::ProviderDenied {
                error: "cancelled".to_string(),
                description: Some("Sign-in cancelled by the host".to_string()),
            },
        );
        true
    }

    /// Expire pending flows past their timeout and evict old terminal flows.
    ///
    /// Returns the number of flows expired by this call.
    pub async fn sweep_expired(&self) -> usize {
        sweep(&self.store, &self.events, self.retention).await
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` until
    /// `cancel` fires.
    pub fn spawn_expiry_sweeper(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let store = self.store.clone();
        let events = self.events.clone();
        let retention = self.retention;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Expiry sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        sweep(&store, &events, retention).await;
                    }
                }
            }
        })
    }

    /// Current status of a flow still held by the store.
    pub async fn flow_status(&self, flow_id: FlowId) -> Result<FlowStatus> {
        self.store.get(flow_id).await.map(|flow| flow.status)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.bus.subscribe()
    }

    /// Events of a single flow.
    pub fn events_for(&self, flow_id: FlowId) -> EventStream {
        EventStream::new(self.subscribe()).for_flow(flow_id.to_string())
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events.bus
    }

    pub fn token_store(&self) -> &TokenStore {
        &self.store
    }

    pub fn jwks_cache(&self) -> &Arc<JwksCache> {
        &self.jwks
    }

    async fn exchange_and_validate(&self, request: &ExchangeRequest) -> Result<IdentityToken> {
        let tokens = self.callbacks.exchange(request).await?;
        let flow = &request.flow;
        self.validator
            .validate(&tokens, flow, flow.expected_issuer(), flow.expected_audience())
            .await
    }

    /// Move the flow to its terminal status for `err` and emit `LoginError`
    /// if this call made the move.
    async fn finish_with_error(&self, flow_id: FlowId, err: SignInError) -> SignInError {
        let transitioned = match err.kind() {
            SignInErrorKind::UnknownFlow => false,
            SignInErrorKind::FlowExpired => self.store.expire(flow_id).await,
            kind => self.store.fail(flow_id, kind.as_str()).await,
        };

        if err.is_security_violation() {
            warn!(kind = %err.kind(), error = %err, "Sign-in rejected");
        } else {
            info!(kind = %err.kind(), error = %err, "Sign-in failed");
        }

        if transitioned {
            self.events.login_error(flow_id, &err);
        }

        err
    }
}

#[derive(Clone)]
struct EventEmitter {
    bus: EventBus,
}

impl EventEmitter {
    fn emit(&self, event: SignInEvent) {
        if self.bus.emit(CoreEvent::SignIn(event)).is_err() {
            debug!("No subscribers for sign-in event");
        }
    }

    fn login_error(&self, flow_id: FlowId, err: &SignInError) {
        self.emit(SignInEvent::LoginError {
            flow_id: flow_id.to_string(),
            kind: err.kind().as_str().to_string(),
            message: err.to_string(),
            security_violation: err.is_security_violation(),
        });
    }
}

async fn sweep(store: &TokenStore, events: &EventEmitter, retention: Duration) -> usize {
    let report = store.sweep(retention).await;

    for flow in &report.expired {
        events.login_error(
            flow.flow_id,
            &SignInError::FlowExpired {
                flow_id: flow.flow_id.to_string(),
            },
        );
    }

    report.expired.len()
}
