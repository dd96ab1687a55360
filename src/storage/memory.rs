//! In-memory state store.

use std::collections::HashMap;
use std::sync::RwLock;

use super::traits::{StateStore, validate_key};
use crate::error::{CadenceError, Result};

/// State store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = values.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl StateStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        validate_key(key)?;
        let values = self.values.read().map_err(|e| CadenceError::Storage(e.to_string()))?;
        Ok(values.get(key).cloned())
    }

    fn save(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        validate_key(key)?;
        let mut values = self.values.write().map_err(|e| CadenceError::Storage(e.to_string()))?;
        values.insert(key.to_string(), value.clone());
        Ok(())
    }
}
