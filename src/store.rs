//! Persistent key/string storage
//!
//! `KeyValueStore` is the synchronous, durable storage surface the rest of
//! the crate persists through (credentials, driver records, toggles). Store
//! failures are never fatal to callers: they log and carry on without
//! persistence.

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Flat key/value storage with no transactions.
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value; removing a missing key is not an error
    fn delete(&self, key: &str) -> Result<()>;

    /// List every key currently stored
    fn list_all(&self) -> Vec<String>;
}

/// In-memory store, optionally bounded to mimic an origin storage quota.
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
    quota_bytes: Option<usize>,
    disabled: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore { entries: Mutex::new(BTreeMap::new()), quota_bytes: None, disabled: false }
    }

    /// A store that rejects writes once keys plus values exceed `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        MemoryStore { quota_bytes: Some(bytes), ..Self::new() }
    }

    /// A store whose every write fails, like storage in private browsing.
    pub fn disabled() -> Self {
        MemoryStore { disabled: true, ..Self::new() }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.disabled {
            return Err(Error::Storage("storage is disabled".into()));
        }
        let mut entries = self.entries.lock().map_err(|_| Error::Storage("store lock poisoned".into()))?;
        if let Some(quota) = self.quota_bytes {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > quota {
                return Err(Error::Storage(format!("quota of {} bytes exceeded", quota)));
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        if self.disabled {
            return Err(Error::Storage("storage is disabled".into()));
        }
        let mut entries = self.entries.lock().map_err(|_| Error::Storage("store lock poisoned".into()))?;
        entries.remove(key);
        Ok(())
    }

    fn list_all(&self) -> Vec<String> {
        self.entries.lock().map(|e| e.keys().cloned().collect()).unwrap_or_default()
    }
}

/// Durable store backed by a single JSON object on disk.
///
/// Every write rewrites the file through a temporary sibling and a rename so
/// a crash never leaves a half-written document behind.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| Error::Storage(format!("corrupt store {}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(FileStore { path, entries: Mutex::new(entries) })
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        let json = serde_json::to_string_pretty(entries).map_err(|e| Error::Storage(e.to_string()))?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| Error::Storage("store lock poisoned".into()))?;
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush(&entries) {
            // keep memory consistent with disk
            match previous {
                Some(v) => entries.insert(key.to_string(), v),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| Error::Storage("store lock poisoned".into()))?;
        if let Some(previous) = entries.remove(key) {
            if let Err(e) = self.flush(&entries) {
                entries.insert(key.to_string(), previous);
                return Err(e);
            }
        }
        Ok(())
    }

    fn list_all(&self) -> Vec<String> {
        self.entries.lock().map(|e| e.keys().cloned().collect()).unwrap_or_default()
    }
}

/// View of a shared store where every key carries a fixed prefix.
#[derive(Clone)]
pub struct Namespaced {
    inner: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl Namespaced {
    pub fn new(inner: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Namespaced { inner, prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Read a `"0"`/`"1"` toggle, falling back to `default` when unset.
    pub fn flag(&self, key: &str, default: bool) -> bool {
        match self.get(key).as_deref() {
            Some("1") => true,
            Some("0") => false,
            _ => default,
        }
    }

    /// Persist a toggle; failures are logged and swallowed.
    pub fn set_flag(&self, key: &str, on: bool) {
        if let Err(e) = self.set(key, if on { "1" } else { "0" }) {
            log::warn!("could not persist flag {}: {}", key, e);
        }
    }
}

impl KeyValueStore for Namespaced {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(&self.full(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set(&self.full(key), value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(&self.full(key))
    }

    /// Keys under this prefix, with the prefix stripped
    fn list_all(&self) -> Vec<String> {
        self.inner
            .list_all()
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect()
    }
}
