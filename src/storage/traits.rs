//! State store trait and typed helpers.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::{CadenceError, Result};

/// Key holding the cumulative execution stats.
pub const STATS_KEY: &str = "stats";
/// Key holding the last known quiet-period anchor.
pub const QUIET_ANCHOR_KEY: &str = "quiet_anchor";

/// Opaque key-value store for the engine's persisted state.
pub trait StateStore: Send + Sync {
    /// Get the blob stored under a key.
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Replace the blob stored under a key.
    fn save(&self, key: &str, value: &serde_json::Value) -> Result<()>;
}

/// Load and deserialize a value.
pub fn load_typed<T: DeserializeOwned>(store: &dyn StateStore, key: &str) -> Result<Option<T>> {
    match store.load(key)? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize and store a value.
pub fn save_typed<T: Serialize>(store: &dyn StateStore, key: &str, value: &T) -> Result<()> {
    store.save(key, &serde_json::to_value(value)?)
}

/// Keys become file names, so keep them to a safe alphabet.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        && !key.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(CadenceError::Storage(format!("Invalid state key: {:?}", key)))
    }
}
