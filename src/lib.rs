//! Workspace facade crate.
//!
//! Re-exports the sign-in client and its host abstractions so applications
//! can depend on `signin-workspace` alone. The `desktop-shims` feature (on by
//! default) lets `CoreConfig::builder()` fall back to the reqwest-based HTTP
//! client when the host does not inject one.

pub use bridge_traits;
pub use core_auth;
pub use core_runtime;

pub use core_auth::{
    CallbackParams, FlowId, FlowStatus, IdentityToken, ProviderEndpoints, SignInClient,
    SignInConfig, SignInError, SignInErrorKind,
};
pub use core_runtime::config::CoreConfig;
pub use core_runtime::events::{CoreEvent, EventBus, SignInEvent};
pub use core_runtime::logging::{init_logging, LoggingConfig};
