// # Persisted Storage Trait
//
// Defines the interface for the key/value persistence behind the widgets.
//
// ## Purpose
//
// The provider keeps two watermarks per scope (and user) here:
// - the last-viewed timestamp
// - the last successful remote sync timestamp
//
// Values are strings; timestamps are string-encoded epoch milliseconds.
//
// ## Implementations
//
// - `MemoryStorage`: process-local, lost on restart
// - `FileStorage`: JSON file with atomic writes and backup recovery
// - `SafeStorage`: wraps either one and falls back to memory on failure

use async_trait::async_trait;

/// Trait for persisted key/value storage implementations
///
/// Implementations must be thread-safe and usable across async tasks.
/// Writes are last-write-wins; no locking beyond the implementation's own is
/// expected from callers.
#[async_trait]
pub trait PersistedStorage: Send + Sync {
    /// Read a value
    ///
    /// # Returns
    ///
    /// - `Ok(Some(String))`: The stored value
    /// - `Ok(None)`: No value under this key
    /// - `Err(Error)`: Storage error
    async fn get(&self, key: &str) -> Result<Option<String>, crate::Error>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: &str) -> Result<(), crate::Error>;

    /// Remove a value (succeeds if it didn't exist)
    async fn remove(&self, key: &str) -> Result<(), crate::Error>;

    /// List all keys in the store
    async fn keys(&self) -> Result<Vec<String>, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}
