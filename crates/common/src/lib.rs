//! Types shared by the session crates and the agent binary

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
