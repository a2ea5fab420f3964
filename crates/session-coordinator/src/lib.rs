//! Authentication session coordinator
//!
//! Owns the lifecycle of the user's session inside a long-running process:
//! persists the session on provider auth events, recovers it at startup and
//! when the application returns to the foreground, routes auth-callback deep
//! links to the provider, and fans auth events out to any number of
//! subscribers.
//!
//! The coordinator moves through `uninitialized -> initialized -> disposed`.
//! Everything except `initialize` fails with `Error::Uninitialized` before
//! the first transition.

pub mod broadcast;
pub mod coordinator;
pub mod error;
pub mod initial;
pub mod lifecycle;

pub use broadcast::{AuthBroadcast, AuthChangeStream};
pub use coordinator::{CoordinatorConfig, ForegroundRecovery, SessionCoordinator};
pub use error::{Error, Result};
pub use initial::InitialSession;
pub use lifecycle::{AppLifecycleState, LifecycleHost, LifecycleHub};
