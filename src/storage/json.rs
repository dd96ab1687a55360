//! JSON file state store with in-memory caching.
//!
//! Each key is one `<key>.json` file in the state directory. Writes go to a
//! temp file first and are renamed into place.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::traits::{StateStore, validate_key};
use crate::error::{CadenceError, Result};

/// File-backed state store.
pub struct JsonFileStore {
    base_path: PathBuf,
    cache: RwLock<HashMap<String, Option<serde_json::Value>>>,
}

impl JsonFileStore {
    /// Open a store rooted at the given directory, creating it if needed.
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", key))
    }

    fn read_file(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&content)?))
    }
}

impl StateStore for JsonFileStore {
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        validate_key(key)?;
        {
            let cache = self.cache.read().map_err(|e| CadenceError::Storage(e.to_string()))?;
            if let Some(value) = cache.get(key) {
                return Ok(value.clone());
            }
        }

        let value = self.read_file(key)?;
        let mut cache = self.cache.write().map_err(|e| CadenceError::Storage(e.to_string()))?;
        cache.insert(key.to_string(), value.clone());
        Ok(value)
    }

    fn save(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        validate_key(key)?;

        // Write file first (source of truth)
        let path = self.key_path(key);
        let tmp_path = self.base_path.join(format!(".{}.json.tmp", key));
        fs::write(&tmp_path, serde_json::to_string_pretty(value)?)?;
        fs::rename(&tmp_path, &path)?;

        // Then update cache
        let mut cache = self.cache.write().map_err(|e| CadenceError::Storage(e.to_string()))?;
        cache.insert(key.to_string(), Some(value.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{STATS_KEY, load_typed, save_typed};
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (JsonFileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_save_and_load() {
        let (store, _temp) = create_test_store();
        store.save(STATS_KEY, &json!({"total_executions": 3})).unwrap();
        assert_eq!(store.load(STATS_KEY).unwrap(), Some(json!({"total_executions": 3})));
    }

    #[test]
    fn test_load_missing_key() {
        let (store, _temp) = create_test_store();
        assert_eq!(store.load("missing").unwrap(), None);
    }

    #[test]
    fn test_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = JsonFileStore::new(temp_dir.path()).unwrap();
            save_typed(&store, "counter", &41u32).unwrap();
            save_typed(&store, "counter", &42u32).unwrap();
        }
        let store = JsonFileStore::new(temp_dir.path()).unwrap();
        let value: Option<u32> = load_typed(&store, "counter").unwrap();
        assert_eq!(value, Some(42));
        assert!(temp_dir.path().join("counter.json").exists());
        assert!(!temp_dir.path().join(".counter.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let (store, temp) = create_test_store();
        fs::write(temp.path().join("stats.json"), "{not json").unwrap();
        assert!(matches!(store.load(STATS_KEY), Err(CadenceError::Json(_))));
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let (store, _temp) = create_test_store();
        assert!(matches!(store.save("../escape", &json!(1)), Err(CadenceError::Storage(_))));
    }

    #[test]
    fn test_creates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");
        let store = JsonFileStore::new(&nested).unwrap();
        assert_eq!(store.base_path(), nested.as_path());
        assert!(nested.is_dir());
    }
}
