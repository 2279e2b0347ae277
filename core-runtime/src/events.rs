//! # Event Bus System
//!
//! Carries sign-in notifications from the core to whatever hosts the client
//! (an app shell, a UI layer, a CLI) using `tokio::sync::broadcast`.
//!
//! ## Notification contract
//!
//! For every sign-in flow the bus carries exactly one terminal notification:
//! either [`SignInEvent::LoginSuccess`] or [`SignInEvent::LoginError`]. Around
//! them the core may emit [`SignInEvent::Started`] and any number of
//! [`SignInEvent::Debug`] messages. Debug messages are diagnostics only and
//! must not drive application logic.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SignInEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::SignIn(SignInEvent::Debug {
//!         flow_id: None,
//!         message: "hello".to_string(),
//!     }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::SignIn(SignInEvent::Debug { .. })));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber fell `n` events behind. Non-fatal.
//! - **`RecvError::Closed`**: all senders were dropped; treat as shutdown.
//!
//! `emit` fails only when nobody is subscribed; emitters ignore that case.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Sign-in flow notifications
    SignIn(SignInEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::SignIn(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::SignIn(SignInEvent::LoginError {
                security_violation: true,
                ..
            }) => EventSeverity::Error,
            CoreEvent::SignIn(SignInEvent::LoginError { .. }) => EventSeverity::Warning,
            CoreEvent::SignIn(SignInEvent::LoginSuccess { .. }) => EventSeverity::Info,
            CoreEvent::SignIn(SignInEvent::Started { .. }) => EventSeverity::Info,
            CoreEvent::SignIn(SignInEvent::Debug { .. }) => EventSeverity::Debug,
        }
    }

    /// Whether this event ends a flow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CoreEvent::SignIn(SignInEvent::LoginSuccess { .. })
                | CoreEvent::SignIn(SignInEvent::LoginError { .. })
        )
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Raw ID token carried by [`SignInEvent::LoginSuccess`].
///
/// `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawIdToken(String);

impl RawIdToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Borrow the compact JWT for handing to a backend.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RawIdToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RawIdToken([REDACTED])")
    }
}

/// Events emitted over the lifetime of a sign-in flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SignInEvent {
    /// A flow was created and its authorization URL handed to the host.
    Started {
        flow_id: String,
        /// Issuer the flow expects its ID token from.
        issuer: String,
    },
    /// The flow finished with a verified identity.
    LoginSuccess {
        flow_id: String,
        subject: String,
        email: String,
        display_name: String,
        picture_url: String,
        id_token: RawIdToken,
    },
    /// The flow finished with an error.
    LoginError {
        flow_id: String,
        /// Stable error kind name (e.g. `"StateMismatch"`).
        kind: String,
        message: String,
        /// True when a security check failed, as opposed to a transient failure.
        security_violation: bool,
    },
    /// Non-authoritative diagnostic message.
    Debug {
        flow_id: Option<String>,
        message: String,
    },
}

impl SignInEvent {
    fn description(&self) -> &str {
        match self {
            SignInEvent::Started { .. } => "Sign-in started",
            SignInEvent::LoginSuccess { .. } => "Sign-in succeeded",
            SignInEvent::LoginError { .. } => "Sign-in failed",
            SignInEvent::Debug { .. } => "Sign-in diagnostic",
        }
    }

    /// Flow this event belongs to, when known.
    pub fn flow_id(&self) -> Option<&str> {
        match self {
            SignInEvent::Started { flow_id, .. }
            | SignInEvent::LoginSuccess { flow_id, .. }
            | SignInEvent::LoginError { flow_id, .. } => Some(flow_id),
            SignInEvent::Debug { flow_id, .. } => flow_id.as_deref(),
        }
    }
}

/// Broadcast bus for [`CoreEvent`]s.
///
/// Cloning is cheap; all clones publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let terminal_only = EventStream::new(event_bus.subscribe()).filter(|e| e.is_terminal());
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Restrict the stream to events of one flow.
    pub fn for_flow(self, flow_id: impl Into<String>) -> Self {
        let flow_id = flow_id.into();
        self.filter(move |event| match event {
            CoreEvent::SignIn(e) => e.flow_id() == Some(flow_id.as_str()),
        })
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without waiting.
    ///
    /// Returns `None` if no matching event is currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}
