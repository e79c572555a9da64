// # Memory Storage
//
// In-memory implementation of PersistedStorage.
//
// ## Purpose
//
// Provides a simple, fast store that doesn't persist across restarts.
// Used directly in tests and embedded setups, and as the fallback inside
// `SafeStorage` when the real backend is unavailable.
//
// ## Restart Behavior
//
// - All watermarks are lost on restart
// - An anonymous visitor is treated as first-time again (seeded to "now")
// - An identified user re-syncs from the API on the next load

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::PersistedStorage;

/// In-memory storage implementation
///
/// This implementation stores all values in a HashMap protected by a RwLock.
///
/// # Example
///
/// ```rust,no_run
/// use changebot_core::storage::MemoryStorage;
/// use changebot_core::traits::PersistedStorage;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let storage = MemoryStorage::new();
///
///     storage.set("changebot:lastViewed:default", "1700000000000").await?;
///
///     let value = storage.get("changebot:lastViewed:default").await?;
///     assert_eq!(value.as_deref(), Some("1700000000000"));
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStorage {
    /// Create a new empty memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of entries
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the storage is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Clear all entries
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }
}

#[async_trait]
impl PersistedStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.inner
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        self.inner.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, Error> {
        Ok(self.inner.read().await.keys().cloned().collect())
    }

    async fn flush(&self) -> Result<(), Error> {
        // Nothing buffered
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage_basic() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty().await);

        storage.set("a", "1").await.unwrap();
        storage.set("b", "2").await.unwrap();
        assert_eq!(storage.len().await, 2);
        assert_eq!(storage.get("a").await.unwrap().as_deref(), Some("1"));

        storage.set("a", "3").await.unwrap();
        assert_eq!(storage.get("a").await.unwrap().as_deref(), Some("3"));

        storage.remove("a").await.unwrap();
        assert!(storage.get("a").await.unwrap().is_none());
        assert_eq!(storage.keys().await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let storage = MemoryStorage::new();
        let other = storage.clone();
        storage.set("k", "v").await.unwrap();
        assert_eq!(other.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
