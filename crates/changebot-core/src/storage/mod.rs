// # Storage
//
// Implementations of the PersistedStorage trait, the infallible SafeStorage
// wrapper the provider talks to, and the key layout shared by all of them.
//
// Keys always carry the scope (and the user id when there is one) so two
// providers never read each other's watermarks.

pub mod file;
pub mod memory;
pub mod safe;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use safe::SafeStorage;

use std::sync::Arc;

use crate::config::StorageConfig;
use crate::traits::PersistedStorage;

/// Prefix shared by every persisted key
pub const KEY_PREFIX: &str = "changebot";

/// `changebot:lastViewed:{scope}[:{userId}]`
pub fn last_viewed_key(scope: &str, user_id: Option<&str>) -> String {
    match user_id {
        Some(user) => format!("{KEY_PREFIX}:lastViewed:{scope}:{user}"),
        None => format!("{KEY_PREFIX}:lastViewed:{scope}"),
    }
}

/// `changebot:lastApiSync:{scope}:{userId}`
pub fn last_api_sync_key(scope: &str, user_id: &str) -> String {
    format!("{KEY_PREFIX}:lastApiSync:{scope}:{user_id}")
}

/// Build storage from configuration
///
/// A file that cannot be opened degrades to in-memory storage with a warning.
pub async fn open(config: &StorageConfig) -> SafeStorage {
    match config {
        StorageConfig::Memory => SafeStorage::in_memory(),
        StorageConfig::File { path } => match FileStorage::new(path).await {
            Ok(file) => SafeStorage::new(Arc::new(file) as Arc<dyn PersistedStorage>),
            Err(e) => {
                tracing::warn!("Falling back to in-memory storage: {}", e);
                SafeStorage::in_memory()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_include_scope_and_user() {
        assert_eq!(last_viewed_key("main", None), "changebot:lastViewed:main");
        assert_eq!(
            last_viewed_key("main", Some("u1")),
            "changebot:lastViewed:main:u1"
        );
        assert_eq!(
            last_api_sync_key("main", "u1"),
            "changebot:lastApiSync:main:u1"
        );
        assert_ne!(last_viewed_key("a", None), last_viewed_key("b", None));
    }
}
