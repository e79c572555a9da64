//! Safe storage
//!
//! Wraps any [`PersistedStorage`] backend so callers never see a storage
//! error. When the backend fails (missing, read-only, quota, I/O), the
//! failure is logged and the operation is served by an in-memory fallback.

use std::sync::Arc;
use tracing::warn;

use crate::storage::MemoryStorage;
use crate::traits::PersistedStorage;

/// Infallible key/value storage with an in-memory fallback
#[derive(Clone)]
pub struct SafeStorage {
    backend: Option<Arc<dyn PersistedStorage>>,
    fallback: MemoryStorage,
}

impl std::fmt::Debug for SafeStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeStorage")
            .field("has_backend", &self.backend.is_some())
            .finish()
    }
}

impl SafeStorage {
    /// Wrap a backend
    pub fn new(backend: Arc<dyn PersistedStorage>) -> Self {
        Self {
            backend: Some(backend),
            fallback: MemoryStorage::new(),
        }
    }

    /// Storage with no backend at all; everything lives in memory
    pub fn in_memory() -> Self {
        Self {
            backend: None,
            fallback: MemoryStorage::new(),
        }
    }

    /// Read a value
    ///
    /// The fallback only holds values whose backend write failed, so it is
    /// newer than whatever the backend still serves.
    pub async fn get(&self, key: &str) -> Option<String> {
        if let Ok(Some(value)) = self.fallback.get(key).await {
            return Some(value);
        }
        if let Some(backend) = &self.backend {
            match backend.get(key).await {
                Ok(Some(value)) => return Some(value),
                Ok(None) => {}
                Err(e) => warn!("Storage read failed for {}, using memory fallback: {}", key, e),
            }
        }
        None
    }

    /// Write a value
    pub async fn set(&self, key: &str, value: &str) {
        if let Some(backend) = &self.backend {
            match backend.set(key, value).await {
                Ok(()) => {
                    // Drop any stale fallback copy so reads see the backend value
                    let _ = self.fallback.remove(key).await;
                    return;
                }
                Err(e) => warn!("Storage write failed for {}, using memory fallback: {}", key, e),
            }
        }
        let _ = self.fallback.set(key, value).await;
    }

    /// Remove a value from the backend and the fallback
    pub async fn remove(&self, key: &str) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.remove(key).await {
                warn!("Storage remove failed for {}: {}", key, e);
            }
        }
        let _ = self.fallback.remove(key).await;
    }

    /// Read an epoch-millisecond timestamp
    ///
    /// Absent, unparseable, zero and negative values all read as `None`.
    pub async fn get_timestamp(&self, key: &str) -> Option<i64> {
        let raw = self.get(key).await?;
        match raw.trim().parse::<i64>() {
            Ok(ts) if ts > 0 => Some(ts),
            Ok(_) => None,
            Err(_) => {
                warn!("Ignoring malformed timestamp under {}: {:?}", key, raw);
                None
            }
        }
    }

    /// Write an epoch-millisecond timestamp
    pub async fn set_timestamp(&self, key: &str, timestamp: i64) {
        self.set(key, &timestamp.to_string()).await;
    }

    /// Persist pending backend changes
    pub async fn flush(&self) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.flush().await {
                warn!("Storage flush failed: {}", e);
            }
        }
    }
}

impl Default for SafeStorage {
    fn default() -> Self {
        Self::in_memory()
    }
}
