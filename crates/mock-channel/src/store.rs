//! In-memory key-value store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use vigil_core::{KeyValueStore, StoreError};

/// A `KeyValueStore` over a `HashMap`, with an optional switch to fail the
/// next N puts (for testing flush re-queueing and write-through warnings).
#[derive(Default)]
pub struct MemoryStore {
    map: RwLock<HashMap<String, serde_json::Value>>,
    fail_puts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` puts return `StoreError::Unavailable`.
    pub fn fail_next_puts(&self, n: usize) {
        self.fail_puts.store(n, Ordering::SeqCst);
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.map.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.map.read().await.is_empty()
    }

    /// Keys with the given prefix, sorted.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .map
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.map.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        let failing = self.fail_puts.load(Ordering::SeqCst);
        if failing > 0 {
            self.fail_puts.store(failing - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("scripted put failure".to_string()));
        }
        self.map.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.map.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_remove() {
        let store = MemoryStore::new();
        store.put("k", json!({"a": 1})).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"a": 1})));

        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scripted_put_failures() {
        let store = MemoryStore::new();
        store.fail_next_puts(1);

        assert!(store.put("k", json!(1)).await.is_err());
        assert!(store.put("k", json!(2)).await.is_ok());
        assert_eq!(store.get("k").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_keys_with_prefix() {
        let store = MemoryStore::new();
        store.put("prefs:alice", json!(1)).await.unwrap();
        store.put("prefs:bob", json!(2)).await.unwrap();
        store.put("pattern:alice", json!(3)).await.unwrap();

        let keys = store.keys_with_prefix("prefs:").await;
        assert_eq!(keys, vec!["prefs:alice", "prefs:bob"]);
    }
}
