//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the sign-in crates:
//! - Logging and tracing setup
//! - Dependency configuration (`CoreConfig`)
//! - The event bus that carries sign-in notifications to the host

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
