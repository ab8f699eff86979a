// persistence.rs — Key-value byte storage for the last-used change set.
//
// One slot per workspace. The key is "{namespace}/{workspace_id}", the value
// is the raw change set id string. Absence is a valid state (first visit).
//
// `FileStore` keeps one file per key in a directory, so the store is easy to
// inspect manually and survives process restarts.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tandem_changeset::{ChangeSetId, WorkspaceId};

use crate::error::SessionError;

/// Byte-string key-value storage.
pub trait KeyValueStore: Send + Sync {
    /// Read a slot. `Ok(None)` if it was never written.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SessionError>;

    /// Write (create or overwrite) a slot.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), SessionError>;
}

/// Derive the persisted slot key for a workspace.
pub fn last_used_key(namespace: &str, workspace_id: &WorkspaceId) -> String {
    format!("{}/{}", namespace, workspace_id)
}

/// Read the last-used change set id for a workspace.
///
/// A slot that is unreadable or does not hold an id counts as absent.
pub fn read_last_used(
    store: &dyn KeyValueStore,
    namespace: &str,
    workspace_id: &WorkspaceId,
) -> Option<ChangeSetId> {
    let key = last_used_key(namespace, workspace_id);
    let bytes = match store.get(&key) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(key = %key, "failed to read last-used change set: {}", e);
            return None;
        }
    };
    let id = std::str::from_utf8(&bytes)
        .ok()
        .and_then(|s| s.trim().parse::<ChangeSetId>().ok());
    if id.is_none() {
        tracing::warn!(key = %key, "ignoring malformed last-used change set slot");
    }
    id
}

/// Write the last-used change set id for a workspace.
pub fn write_last_used(
    store: &dyn KeyValueStore,
    namespace: &str,
    workspace_id: &WorkspaceId,
    change_set_id: &ChangeSetId,
) -> Result<(), SessionError> {
    let key = last_used_key(namespace, workspace_id);
    store.set(&key, change_set_id.to_string().as_bytes())
}

/// In-memory store (tests and ephemeral sessions).
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SessionError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), SessionError> {
        self.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// Directory-backed store: one file per key.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a new store backed by the given directory.
    /// Creates the directory if it doesn't exist.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, SessionError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| SessionError::IoError {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`.
    fn slot_file(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(file_name)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SessionError> {
        let path = self.slot_file(key);
        if !path.exists() {
            return Ok(None);
        }
        fs::read(&path)
            .map(Some)
            .map_err(|source| SessionError::IoError { path, source })
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), SessionError> {
        let path = self.slot_file(key);
        fs::write(&path, value).map_err(|source| SessionError::IoError { path, source })
    }
}
