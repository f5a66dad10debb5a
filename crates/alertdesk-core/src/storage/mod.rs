//! Durable key-value storage.
//!
//! Session state, lockout counters and the audit log all live in a flat
//! string key-value store, the same shape as browser local storage:
//! - `FileStore`: one JSON document per key in the data directory
//! - `MemoryStore`: process-local map, used for ephemeral runs and tests

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Storage keys used by the session layer
pub mod keys {
    pub const SESSION_TOKEN: &str = "session_token";
    pub const SESSION_USERNAME: &str = "session_username";
    pub const SESSION_LAST_ACTIVITY: &str = "session_last_activity";
    pub const FAILED_ATTEMPTS: &str = "failed_attempts";
    pub const LOCKOUT_UNTIL: &str = "lockout_until";
    pub const AUDIT_LOG: &str = "audit_log";
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<()>;
}

/// Read and deserialize a JSON value stored under `key`
pub fn read_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(raw) => {
            let value = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse stored value: {}", key))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Serialize a value to JSON and store it under `key`
pub fn write_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_string(value)
        .with_context(|| format!("Failed to serialize value: {}", key))?;
    store.set(key, &raw)
}
