//! File-backed session store
//!
//! The file is a JSON object mapping a persist key to the serialized session,
//! so several applications (or environments) can share one file without
//! clobbering each other. A file that is not valid JSON is replaced with an
//! empty map at load. All writes use atomic temp-file + rename. A tokio
//! Mutex serializes concurrent writes from the auth-event task and the
//! foreground recovery path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::{SessionStore, StoreFuture};

/// Key used when none is configured.
pub const DEFAULT_PERSIST_KEY: &str = "gotrue.session";

/// Session store persisted to a JSON file.
pub struct FileSessionStore {
    path: PathBuf,
    key: String,
    /// `None` until `initialize()` has loaded the file
    state: Mutex<Option<HashMap<String, String>>>,
}

impl FileSessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self::with_key(path, DEFAULT_PERSIST_KEY)
    }

    pub fn with_key(path: PathBuf, key: impl Into<String>) -> Self {
        Self {
            path,
            key: key.into(),
            state: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Ok(());
        }

        let records = if self.path.exists() {
            let contents = tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|e| Error::Io(format!("reading session file: {e}")))?;
            match serde_json::from_str::<HashMap<String, String>>(&contents) {
                Ok(records) => {
                    info!(
                        path = %self.path.display(),
                        has_record = records.contains_key(&self.key),
                        "loaded session file"
                    );
                    records
                }
                Err(e) => {
                    // Unreadable records are dropped, not fatal
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "session file is corrupt, discarding it"
                    );
                    let records = HashMap::new();
                    write_atomic(&self.path, &records).await?;
                    records
                }
            }
        } else {
            info!(path = %self.path.display(), "session file not found, starting empty");
            if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| Error::Io(format!("creating session directory: {e}")))?;
            }
            let records = HashMap::new();
            write_atomic(&self.path, &records).await?;
            records
        };

        *state = Some(records);
        Ok(())
    }

    async fn get(&self) -> Result<Option<String>> {
        let state = self.state.lock().await;
        let records = state.as_ref().ok_or(Error::NotInitialized)?;
        Ok(records.get(&self.key).cloned())
    }

    async fn put(&self, record: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let records = state.as_mut().ok_or(Error::NotInitialized)?;
        records.insert(self.key.clone(), record.to_string());
        debug!(key = %self.key, "persisting session record");
        write_atomic(&self.path, records).await
    }

    async fn remove(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let records = state.as_mut().ok_or(Error::NotInitialized)?;
        if records.remove(&self.key).is_some() {
            debug!(key = %self.key, "removed session record");
            write_atomic(&self.path, records).await?;
        }
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn initialize(&self) -> StoreFuture<'_, ()> {
        Box::pin(self.load())
    }

    fn has_record(&self) -> StoreFuture<'_, bool> {
        Box::pin(async move { Ok(self.get().await?.is_some()) })
    }

    fn read_record(&self) -> StoreFuture<'_, Option<String>> {
        Box::pin(self.get())
    }

    fn write_record<'a>(&'a self, record: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(self.put(record))
    }

    fn delete_record(&self) -> StoreFuture<'_, ()> {
        Box::pin(self.remove())
    }
}

/// Write the record map atomically with 0600 permissions (unix).
async fn write_atomic(path: &Path, records: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(records)
        .map_err(|e| Error::Parse(format!("serializing session file: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("session path has no parent directory".into()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("session");
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting session file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), "persisted session file");
    Ok(())
}
