//! Last-seen tracking with a cache-then-sync policy
//!
//! Local storage is always the first answer. For identified users the remote
//! tracking record is consulted in the background at most once per cache TTL,
//! and only a successful round-trip stamps the sync time, so a failed sync is
//! retried at the next opportunity.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::ApiClient;
use crate::scoped::ScopedActions;
use crate::services::ViewRecorder;
use crate::storage::{SafeStorage, last_api_sync_key, last_viewed_key};
use crate::updates::{now_ms, parse_timestamp_ms};

/// Tracks one scope's last-viewed watermark across storage, store and API
pub struct LastSeenTracker {
    scope: String,
    user_id: Option<String>,
    user_data: Option<Value>,
    storage: SafeStorage,
    api: Option<ApiClient>,
    actions: ScopedActions,
    cache_ttl_ms: i64,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for LastSeenTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LastSeenTracker")
            .field("scope", &self.scope)
            .field("user_id", &self.user_id)
            .field("api", &self.api)
            .field("cache_ttl_ms", &self.cache_ttl_ms)
            .finish()
    }
}

impl LastSeenTracker {
    pub fn new(
        scope: impl Into<String>,
        user_id: Option<String>,
        user_data: Option<Value>,
        storage: SafeStorage,
        api: Option<ApiClient>,
        actions: ScopedActions,
        cache_ttl_ms: i64,
    ) -> Self {
        Self {
            scope: scope.into(),
            user_id,
            user_data,
            storage,
            api,
            actions,
            cache_ttl_ms,
            background: Mutex::new(None),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    fn last_viewed_key(&self) -> String {
        last_viewed_key(&self.scope, self.user_id.as_deref())
    }

    /// Locally persisted watermark
    pub async fn get_last_viewed_time(&self) -> Option<i64> {
        self.storage.get_timestamp(&self.last_viewed_key()).await
    }

    /// Whether the remote record is due for a sync
    ///
    /// True for identified users with an API endpoint when no sync has been
    /// recorded yet or the last one is older than the cache TTL.
    pub async fn should_sync_with_api(&self) -> bool {
        let (Some(user), Some(_)) = (self.user_id.as_deref(), self.api.as_ref()) else {
            return false;
        };
        match self
            .storage
            .get_timestamp(&last_api_sync_key(&self.scope, user))
            .await
        {
            None => true,
            Some(last_sync) => now_ms() - last_sync > self.cache_ttl_ms,
        }
    }

    /// Return the local watermark and sync in the background when due
    ///
    /// The local value is applied to the store before returning. The sync,
    /// if started, may overwrite it later.
    pub async fn fetch_last_seen(self: &Arc<Self>) -> Option<i64> {
        let local = self.get_last_viewed_time().await;
        if let Some(ts) = local {
            self.actions.mark_viewed(Some(ts));
        }

        if self.should_sync_with_api().await {
            let mut background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
            let running = background.as_ref().is_some_and(|handle| !handle.is_finished());
            if running {
                debug!("Sync for scope {} already running", self.scope);
            } else {
                let tracker = Arc::clone(self);
                *background = Some(tokio::spawn(async move {
                    tracker.sync_from_api().await;
                }));
            }
        }

        local
    }

    /// Pull the remote watermark into local storage and the store
    ///
    /// Returns whether the round-trip succeeded. On failure local state is
    /// left alone and the sync time is not stamped.
    pub async fn sync_from_api(&self) -> bool {
        let (Some(user), Some(api)) = (self.user_id.as_deref(), self.api.as_ref()) else {
            return false;
        };

        let Some(tracking) = api.fetch_user_tracking(user).await else {
            warn!("Keeping cached last-viewed for scope {}", self.scope);
            return false;
        };

        match tracking.last_seen_at.as_deref() {
            None => {
                let now = now_ms();
                info!("First visit for user {} on scope {}, seeding last-viewed", user, self.scope);
                self.storage.set_timestamp(&self.last_viewed_key(), now).await;
                self.actions.mark_viewed(Some(now));
                api.update_user_tracking(user, now, self.user_data.as_ref())
                    .await;
            }
            Some(raw) => match parse_timestamp_ms(raw) {
                Some(remote) => {
                    debug!("Remote last-viewed for {} is {}", user, remote);
                    self.storage.set_timestamp(&self.last_viewed_key(), remote).await;
                    self.actions.mark_viewed(Some(remote));
                }
                None => {
                    error!("Ignoring unparseable last_seen_at {:?} for user {}", raw, user);
                }
            },
        }

        self.storage
            .set_timestamp(&last_api_sync_key(&self.scope, user), now_ms())
            .await;
        true
    }

    /// Record a view locally, and remotely for identified users
    ///
    /// Non-positive timestamps are logged and skipped. The remote update is
    /// best-effort and never rolls back the local write.
    pub async fn set_last_viewed(&self, timestamp: i64) {
        if timestamp <= 0 {
            error!("Refusing to store invalid last-viewed timestamp {}", timestamp);
            return;
        }

        self.storage.set_timestamp(&self.last_viewed_key(), timestamp).await;
        self.actions.mark_viewed(Some(timestamp));

        if let (Some(user), Some(api)) = (self.user_id.as_deref(), self.api.as_ref()) {
            api.update_user_tracking(user, timestamp, self.user_data.as_ref())
                .await;
        }
    }

    /// Wait for a background sync started by [`Self::fetch_last_seen`]
    pub async fn wait_for_background_sync(&self) {
        let handle = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Background sync for scope {} did not finish: {}", self.scope, e);
            }
        }
    }

    /// Stop a running background sync
    pub(crate) fn abort_background_sync(&self) {
        if let Some(handle) = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

#[async_trait]
impl ViewRecorder for LastSeenTracker {
    async fn record_view(&self, timestamp: i64) {
        self.set_last_viewed(timestamp).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Endpoint;
    use crate::error::{Error, Result};
    use crate::scoped::ScopedStore;
    use crate::traits::ChangelogTransport;
    use crate::updates::format_timestamp_ms;
    use serde_json::json;
    use std::collections::VecDeque;

    const TTL_MS: i64 = 30 * 60 * 1000;

    #[derive(Default)]
    struct QueueTransport {
        gets: Mutex<VecDeque<Result<Value>>>,
        patches: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl ChangelogTransport for QueueTransport {
        async fn get_json(&self, _url: &str) -> Result<Value> {
            self.gets
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::http("connection refused")))
        }

        async fn patch_json(&self, url: &str, body: &Value) -> Result<()> {
            self.patches.lock().unwrap().push((url.to_string(), body.clone()));
            Ok(())
        }

        fn transport_name(&self) -> &'static str {
            "queue"
        }
    }

    fn tracker(
        transport: Arc<QueueTransport>,
        user: Option<&str>,
        storage: SafeStorage,
    ) -> (Arc<LastSeenTracker>, ScopedStore) {
        let scoped = ScopedStore::new(transport.clone(), "https://api.test/v1");
        let endpoint = Endpoint::resolve("https://api.test/v1", Some("acme"), None).unwrap();
        let tracker = LastSeenTracker::new(
            "main",
            user.map(String::from),
            None,
            storage,
            Some(ApiClient::new(transport, endpoint)),
            scoped.actions().clone(),
            TTL_MS,
        );
        (Arc::new(tracker), scoped)
    }

    #[tokio::test]
    async fn anonymous_users_never_sync() {
        let (tracker, _) = tracker(Arc::default(), None, SafeStorage::in_memory());
        assert!(!tracker.should_sync_with_api().await);
        assert!(!tracker.sync_from_api().await);
    }

    #[tokio::test]
    async fn failed_sync_does_not_stamp() {
        let storage = SafeStorage::in_memory();
        let (tracker, _) = tracker(Arc::default(), Some("u1"), storage.clone());

        assert!(tracker.should_sync_with_api().await);
        assert!(!tracker.sync_from_api().await);
        assert!(storage.get(&last_api_sync_key("main", "u1")).await.is_none());
        assert!(tracker.should_sync_with_api().await);
    }

    #[tokio::test]
    async fn recent_sync_is_not_repeated() {
        let storage = SafeStorage::in_memory();
        storage
            .set_timestamp(&last_api_sync_key("main", "u1"), now_ms() - 60_000)
            .await;
        let (tracker, _) = tracker(Arc::default(), Some("u1"), storage.clone());
        assert!(!tracker.should_sync_with_api().await);

        storage
            .set_timestamp(&last_api_sync_key("main", "u1"), now_ms() - TTL_MS - 1)
            .await;
        assert!(tracker.should_sync_with_api().await);
    }

    #[tokio::test]
    async fn remote_value_overwrites_local() {
        let transport = Arc::new(QueueTransport::default());
        let remote = now_ms() - 10_000;
        transport.gets.lock().unwrap().push_back(Ok(json!({
            "id": "u1",
            "last_seen_at": format_timestamp_ms(remote).unwrap()
        })));
        let storage = SafeStorage::in_memory();
        let (tracker, scoped) = tracker(transport, Some("u1"), storage.clone());

        assert!(tracker.sync_from_api().await);
        assert_eq!(tracker.get_last_viewed_time().await, Some(remote));
        assert_eq!(scoped.store().last_viewed(), Some(remote));
        assert!(storage.get(&last_api_sync_key("main", "u1")).await.is_some());
    }

    #[tokio::test]
    async fn unseen_user_is_seeded_and_patched() {
        let transport = Arc::new(QueueTransport::default());
        transport
            .gets
            .lock()
            .unwrap()
            .push_back(Ok(json!({"id": "u1", "last_seen_at": null})));
        let (tracker, scoped) = tracker(transport.clone(), Some("u1"), SafeStorage::in_memory());

        assert!(tracker.sync_from_api().await);
        assert!(scoped.store().last_viewed().is_some());
        let patches = transport.patches.lock().unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].0, "https://api.test/v1/widgets/acme/users/u1");
        assert!(patches[0].1["last_seen_at"].is_string());
    }

    #[tokio::test]
    async fn set_last_viewed_writes_locally_and_remotely() {
        let transport = Arc::new(QueueTransport::default());
        let (tracker, scoped) = tracker(transport.clone(), Some("u1"), SafeStorage::in_memory());

        tracker.set_last_viewed(1_700_000_000_000).await;
        assert_eq!(tracker.get_last_viewed_time().await, Some(1_700_000_000_000));
        assert_eq!(scoped.store().last_viewed(), Some(1_700_000_000_000));
        assert_eq!(transport.patches.lock().unwrap().len(), 1);

        tracker.set_last_viewed(0).await;
        assert_eq!(tracker.get_last_viewed_time().await, Some(1_700_000_000_000));
        assert_eq!(transport.patches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fetch_last_seen_returns_local_then_syncs() {
        let transport = Arc::new(QueueTransport::default());
        let remote = now_ms() - 5_000;
        transport.gets.lock().unwrap().push_back(Ok(json!({
            "id": "u1",
            "last_seen_at": format_timestamp_ms(remote).unwrap()
        })));
        let storage = SafeStorage::in_memory();
        storage
            .set_timestamp(&last_viewed_key("main", Some("u1")), 1_000)
            .await;
        let (tracker, scoped) = tracker(transport, Some("u1"), storage);

        assert_eq!(tracker.fetch_last_seen().await, Some(1_000));
        tracker.wait_for_background_sync().await;
        assert_eq!(scoped.store().last_viewed(), Some(remote));
    }
}
