//! # Host Bridge Traits
//!
//! Abstractions the sign-in core needs from its host, kept narrow so that the
//! core never talks to a concrete network stack, wall clock, or log pipeline
//! directly.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - HTTPS calls to the identity provider
//!   (token endpoint, JWKS endpoint, discovery document)
//! - [`Clock`](time::Clock) - Time source, swappable for deterministic tests
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Implementations
//!
//! | Platform | Implementation Crate |
//! |----------|---------------------|
//! | Desktop  | `bridge-desktop`    |
//! | Mobile   | injected by the embedding app |
//!
//! ## Error Handling
//!
//! All bridge traits report failures through [`BridgeError`](error::BridgeError).
//! Implementations should map platform errors into it with actionable messages
//! and must never embed credentials in those messages.
//!
//! ## Thread Safety
//!
//! Every trait requires `Send + Sync`: callbacks for a sign-in flow may arrive on
//! a different task or thread than the one that started the flow.

pub mod error;
pub mod http;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
