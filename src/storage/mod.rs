//! Persistence layer.
//!
//! A small async key-value store over JSON values. Wallet records,
//! settings and alert lists are each stored under their own key.
//! `JsonFileStore` keeps the whole map in one JSON file; `MemoryStore`
//! is used by tests and ephemeral runs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::types::GuardError;

/// Default store file path.
pub const DEFAULT_STORE_FILE: &str = "walletguard_store.json";

/// Well-known keys other than the per-wallet ones.
pub mod keys {
    pub const SETTINGS: &str = "settings";
    pub const ALERT_HISTORY: &str = "alertHistory";
    pub const UNREAD_ALERTS: &str = "unreadAlerts";
    pub const NOTIFICATIONS: &str = "notifications";
}

/// Abstraction over persistent key-value storage.
///
/// Reads of absent keys are not errors: they return `Ok(None)`.
/// An `Err` means the storage layer itself failed.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// Read and decode a typed value. Decoding failures are errors.
pub async fn read_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(value) => {
            let decoded = serde_json::from_value(value)
                .with_context(|| format!("Failed to decode stored value for key {key}"))?;
            Ok(Some(decoded))
        }
        None => Ok(None),
    }
}

/// Encode and write a typed value.
pub async fn write_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let json = serde_json::to_value(value)
        .with_context(|| format!("Failed to encode value for key {key}"))?;
    store.set(key, json).await
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// Whole-map JSON file, loaded on open and written through on every mutation.
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<Map<String, Value>>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = if tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("Failed to stat store file {}", path.display()))?
        {
            let json = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read store from {}", path.display()))?;
            let map: Map<String, Value> = serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse store from {}", path.display()))?;
            info!(path = %path.display(), keys = map.len(), "Store loaded from disk");
            map
        } else {
            info!(path = %path.display(), "No store file found, starting empty");
            Map::new()
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Write to a sibling temp file then rename, so a crash never leaves
    /// a truncated store behind. I/O failures surface as
    /// `GuardError::Storage` for `key`.
    async fn persist(&self, key: &str, entries: &Map<String, Value>) -> Result<()> {
        let json = serde_json::to_string_pretty(entries).context("Failed to serialise store")?;
        let tmp = self.path.with_extension("json.tmp");

        let written = match tokio::fs::write(&tmp, &json).await {
            Ok(()) => tokio::fs::rename(&tmp, &self.path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            return Err(GuardError::Storage {
                key: key.to_string(),
                message: format!("{}: {e}", self.path.display()),
            }
            .into());
        }

        debug!(path = %self.path.display(), keys = entries.len(), "Store saved");
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    // Mutations are staged on a copy and only committed once on disk.
    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.write().await;
        let mut next = entries.clone();
        next.insert(key.to_string(), value);
        self.persist(key, &next).await?;
        *entries = next;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.persist(key, &next).await?;
        *entries = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

/// Memory store whose writes to chosen keys fail once.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    fail_next: std::sync::Mutex<std::collections::HashSet<String>>,
}

#[cfg(test)]
impl FlakyStore {
    pub(crate) fn fail_next_write(&self, key: &str) {
        self.fail_next.lock().unwrap().insert(key.to_string());
    }

    fn check(&self, key: &str) -> Result<()> {
        if self.fail_next.lock().unwrap().remove(key) {
            return Err(GuardError::Storage {
                key: key.to_string(),
                message: "disk full".into(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.check(key)?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check(key)?;
        self.inner.remove(key).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
