//! In-memory session store

use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::{SessionStore, StoreFuture};

#[derive(Default)]
struct MemoryState {
    initialized: bool,
    record: Option<String>,
}

/// Process-local store. Honors the same initialize-before-use contract as
/// the file store.
#[derive(Default)]
pub struct MemorySessionStore {
    state: Mutex<MemoryState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a record, as if persisted by an earlier process.
    pub fn with_record(record: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                initialized: false,
                record: Some(record.into()),
            }),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn initialize(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.state.lock().await.initialized = true;
            Ok(())
        })
    }

    fn has_record(&self) -> StoreFuture<'_, bool> {
        Box::pin(async move { Ok(self.read_record().await?.is_some()) })
    }

    fn read_record(&self) -> StoreFuture<'_, Option<String>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            if !state.initialized {
                return Err(Error::NotInitialized);
            }
            Ok(state.record.clone())
        })
    }

    fn write_record<'a>(&'a self, record: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if !state.initialized {
                return Err(Error::NotInitialized);
            }
            state.record = Some(record.to_string());
            Ok(())
        })
    }

    fn delete_record(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if !state.initialized {
                return Err(Error::NotInitialized);
            }
            state.record = None;
            Ok(())
        })
    }
}
