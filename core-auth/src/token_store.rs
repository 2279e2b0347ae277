//! Transient Flow Storage
//!
//! Holds the secrets of every in-flight sign-in attempt (PKCE verifier,
//! `state`, nonce, expected issuer and audience) keyed by [`FlowId`].
//!
//! ## Guarantees
//!
//! - One flow per `FlowId`; ids are random UUIDs
//! - Status moves only from `Pending` to a terminal status. `complete`, `fail`
//!   and `expire` return `true` only for the call that made that move, so the
//!   caller that sees `true` is the single owner of the flow's outcome
//! - State lives in process memory only and never outlives the process
//! - Safe to share across tasks; all access goes through one `RwLock`
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{SignInConfig, TokenStore};
//! use bridge_traits::SystemClock;
//! use std::sync::Arc;
//!
//! # async fn example() -> core_auth::Result<()> {
//! let store = TokenStore::new(Arc::new(SystemClock));
//! let config = Arc::new(SignInConfig::builder("abc", "app://cb").build()?);
//!
//! let flow = store.create(config).await;
//! let snapshot = store.get(flow.flow_id).await?;
//! assert!(store.complete(snapshot.flow_id).await);
//! # Ok(())
//! # }
//! ```

use crate::config::SignInConfig;
use crate::error::{Result, SignInError};
use crate::oauth::{generate_nonce, PkceVerifier};
use crate::types::{FlowId, FlowStatus, SignInFlow};
use bridge_traits::Clock;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct FlowEntry {
    flow: SignInFlow,
    /// Set once a callback has claimed the flow for a token exchange
    exchange_in_flight: bool,
    finished_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
}

/// Result of [`TokenStore::sweep`].
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Flows this sweep moved from `Pending` to `Expired`
    pub expired: Vec<SignInFlow>,
    /// Number of terminal flows evicted after the retention window
    pub evicted: usize,
}

/// Guarded map of sign-in flows.
///
/// Cloning is cheap; clones share the same map.
#[derive(Clone)]
pub struct TokenStore {
    flows: Arc<RwLock<HashMap<FlowId, FlowEntry>>>,
    clock: Arc<dyn Clock>,
}

impl TokenStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        debug!("Initializing TokenStore");
        Self {
            flows: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Create a pending flow with fresh random `state`, PKCE verifier and,
    /// when the config asks for it, a nonce.
    pub async fn create(&self, config: Arc<SignInConfig>) -> SignInFlow {
        let pkce = PkceVerifier::new();
        let code_challenge = pkce.challenge();
        let (code_verifier, state) = pkce.into_parts();
        let nonce = config.use_nonce.then(generate_nonce);

        let flow = SignInFlow {
            flow_id: FlowId::new(),
            state,
            code_verifier,
            code_challenge,
            nonce,
            created_at: self.clock.now(),
            status: FlowStatus::Pending,
            config,
        };

        let mut flows = self.flows.write().await;
        flows.insert(
            flow.flow_id,
            FlowEntry {
                flow: flow.clone(),
                exchange_in_flight: false,
                finished_at: None,
                failure_reason: None,
            },
        );

        debug!(flow_id = %flow.flow_id, "Created sign-in flow");
        flow
    }

    /// Snapshot of a flow in any status.
    ///
    /// # Errors
    ///
    /// [`SignInError::UnknownFlow`] if the flow does not exist or was evicted.
    pub async fn get(&self, flow_id: FlowId) -> Result<SignInFlow> {
        let flows = self.flows.read().await;
        flows
            .get(&flow_id)
            .map(|entry| entry.flow.clone())
            .ok_or_else(|| SignInError::unknown_flow(flow_id))
    }

    /// Claim a pending flow for a token exchange.
    ///
    /// At most one caller can claim a flow. The flow stays `Pending` until
    /// the claimer moves it to a terminal status.
    ///
    /// # Errors
    ///
    /// - [`SignInError::UnknownFlow`] if the flow is absent, terminal (other
    ///   than expired) or already claimed
    /// - [`SignInError::FlowExpired`] if the flow expired or is past its
    ///   timeout; a timed-out flow is left `Pending` for the caller to expire
    pub async fn claim(&self, flow_id: FlowId) -> Result<SignInFlow> {
        let now = self.clock.now();
        let mut flows = self.flows.write().await;

        let entry = flows
            .get_mut(&flow_id)
            .ok_or_else(|| SignInError::unknown_flow(flow_id))?;

        match entry.flow.status {
            FlowStatus::Pending => {}
            FlowStatus::Expired => {
                return Err(SignInError::FlowExpired {
                    flow_id: flow_id.to_string(),
                })
            }
            FlowStatus::Completed | FlowStatus::Failed => {
                return Err(SignInError::unknown_flow(flow_id))
            }
        }

        if entry.exchange_in_flight {
            warn!(flow_id = %flow_id, "Rejected callback for a flow already being exchanged");
            return Err(SignInError::unknown_flow(flow_id));
        }

        if entry.flow.is_expired_at(now) {
            return Err(SignInError::FlowExpired {
                flow_id: flow_id.to_string(),
            });
        }

        entry.exchange_in_flight = true;
        Ok(entry.flow.clone())
    }

    /// Mark a pending flow completed. Returns `false` if it was not pending.
    pub async fn complete(&self, flow_id: FlowId) -> bool {
        self.transition(flow_id, FlowStatus::Completed, None).await
    }

    /// Mark a pending flow failed. Returns `false` if it was not pending.
    pub async fn fail(&self, flow_id: FlowId, reason: &str) -> bool {
        self.transition(flow_id, FlowStatus::Failed, Some(reason))
            .await
    }

    /// Mark a pending flow expired. Returns `false` if it was not pending.
    pub async fn expire(&self, flow_id: FlowId) -> bool {
        self.transition(flow_id, FlowStatus::Expired, None).await
    }

    /// Why a failed flow failed, while it is still retained.
    pub async fn failure_reason(&self, flow_id: FlowId) -> Option<String> {
        let flows = self.flows.read().await;
        flows
            .get(&flow_id)
            .and_then(|entry| entry.failure_reason.clone())
    }

    /// Expire pending flows past their timeout and evict terminal flows
    /// that finished more than `retention` ago.
    pub async fn sweep(&self, retention: Duration) -> SweepReport {
        let now = self.clock.now();
        let retention =
            chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(1));
        let mut report = SweepReport::default();

        let mut flows = self.flows.write().await;

        for entry in flows.values_mut() {
            if entry.flow.status == FlowStatus::Pending && entry.flow.is_expired_at(now) {
                entry.flow.status = FlowStatus::Expired;
                entry.finished_at = Some(now);
                report.expired.push(entry.flow.clone());
            }
        }

        let before = flows.len();
        flows.retain(|_, entry| match entry.finished_at {
            Some(finished_at) => now - finished_at <= retention,
            None => true,
        });
        report.evicted = before - flows.len();

        if !report.expired.is_empty() || report.evicted > 0 {
            info!(
                expired = report.expired.len(),
                evicted = report.evicted,
                "Swept sign-in flows"
            );
        }

        report
    }

    /// Number of flows currently held, in any status.
    pub async fn len(&self) -> usize {
        self.flows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.flows.read().await.is_empty()
    }

    pub async fn pending_count(&self) -> usize {
        let flows = self.flows.read().await;
        flows
            .values()
            .filter(|entry| entry.flow.status == FlowStatus::Pending)
            .count()
    }

    async fn transition(&self, flow_id: FlowId, to: FlowStatus, reason: Option<&str>) -> bool {
        let now = self.clock.now();
        let mut flows = self.flows.write().await;

        let Some(entry) = flows.get_mut(&flow_id) else {
            return false;
        };

        if entry.flow.status.is_terminal() {
            debug!(
                flow_id = %flow_id,
                status = %entry.flow.status,
                requested = %to,
                "Ignoring transition of terminal flow"
            );
            return false;
        }

        entry.flow.status = to;
        entry.finished_at = Some(now);
        entry.failure_reason = reason.map(str::to_string);

        debug!(flow_id = %flow_id, status = %to, "Sign-in flow finished");
        true
    }
}
