//! Durable key-value storage.
//!
//! [`KeyValueStore`] is the raw backend (a directory of JSON documents, or a
//! map in memory). [`Storage`] is the typed adapter the rest of the core talks
//! to: reads fall back to a default and writes never fail past its boundary.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::StoreError;

/// Key holding the ordered session collection.
pub const SESSIONS_KEY: &str = "chat-sessions";
/// Key holding the current session id (may be empty).
pub const CURRENT_SESSION_KEY: &str = "current-session";
/// Key holding the theme settings.
pub const THEME_KEY: &str = "theme";

/// Raw string storage. Implementations hold no business logic.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Write several keys so that readers see all of them or none.
    ///
    /// The default writes one after another; backends that can do better override it.
    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }
}

/// In-process store, lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A panic while holding the lock cannot leave a half-written entry behind.
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        let mut values = self.lock();
        for (key, value) in entries {
            values.insert(key.to_string(), value.clone());
        }
        Ok(())
    }
}

/// One `<key>.json` file per key inside a directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!("Store directory: {}", dir.display());
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    fn stage(&self, key: &str, value: &str) -> Result<(PathBuf, PathBuf), StoreError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        Ok((tmp, path))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let (tmp, path) = self.stage(key, value)?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        // Stage every value before the first rename so a failed write changes nothing.
        let mut staged = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match self.stage(key, value) {
                Ok(pair) => staged.push(pair),
                Err(e) => {
                    for (tmp, _) in &staged {
                        let _ = fs::remove_file(tmp);
                    }
                    return Err(e);
                }
            }
        }
        for (tmp, path) in staged {
            fs::rename(tmp, path)?;
        }
        Ok(())
    }
}

/// Typed adapter over an optional backend.
///
/// With no backend every read yields the default and every write is dropped.
/// Failures are logged, never returned.
#[derive(Clone)]
pub struct Storage {
    backend: Option<Arc<dyn KeyValueStore>>,
}

impl Storage {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Storage with no backend at all.
    pub fn unavailable() -> Self {
        Self { backend: None }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    /// Read and decode `key`, or `default` when absent, unreadable, or malformed.
    pub fn read<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.try_read(key) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                warn!(key, error = %e, "failed to read stored value, using default");
                default
            }
        }
    }

    pub fn read_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        self.read(key, T::default())
    }

    fn try_read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(backend) = &self.backend else {
            return Ok(None);
        };
        match backend.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Encode and write `value`. Errors are logged and swallowed.
    pub fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let Some(backend) = &self.backend else {
            return;
        };
        let result = serde_json::to_string(value)
            .map_err(StoreError::from)
            .and_then(|raw| backend.set(key, &raw));
        if let Err(e) = result {
            warn!(key, error = %e, "failed to persist value");
        }
    }

    /// Write several already-encoded values together. Nothing is written if
    /// any value fails to encode.
    pub fn write_batch(&self, entries: &[(&str, serde_json::Value)]) {
        let Some(backend) = &self.backend else {
            return;
        };
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::to_string(value) {
                Ok(raw) => encoded.push((*key, raw)),
                Err(e) => {
                    warn!(key, error = %e, "failed to encode value, batch dropped");
                    return;
                }
            }
        }
        if let Err(e) = backend.set_many(&encoded) {
            let keys: Vec<&str> = encoded.iter().map(|(k, _)| *k).collect();
            warn!(?keys, error = %e, "failed to persist batch");
        }
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("available", &self.is_available())
            .finish()
    }
}
