//! Durable storage for the persisted session record
//!
//! A `SessionStore` holds at most one serialized session string. Backends must
//! be initialized before any read or write; operations on an uninitialized
//! store fail with `Error::NotInitialized`.
//!
//! Backends:
//! - `FileSessionStore`: JSON document on disk, atomic temp-file + rename writes
//! - `MemorySessionStore`: process-local, for tests and ephemeral sessions

pub mod error;
pub mod file;
pub mod memory;

pub use error::{Error, Result};
pub use file::{DEFAULT_PERSIST_KEY, FileSessionStore};
pub use memory::MemorySessionStore;

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Key/value persistence for one serialized session.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn SessionStore>`).
pub trait SessionStore: Send + Sync {
    /// Acquire the backing storage. Idempotent.
    fn initialize(&self) -> StoreFuture<'_, ()>;

    /// Whether a persisted record exists.
    fn has_record(&self) -> StoreFuture<'_, bool>;

    /// Read the persisted record, if any.
    fn read_record(&self) -> StoreFuture<'_, Option<String>>;

    /// Replace the persisted record (last write wins).
    fn write_record<'a>(&'a self, record: &'a str) -> StoreFuture<'a, ()>;

    /// Remove the persisted record. Removing an absent record is not an error.
    fn delete_record(&self) -> StoreFuture<'_, ()>;
}
