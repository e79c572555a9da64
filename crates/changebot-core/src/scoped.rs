//! Scoped store factory
//!
//! Wraps one [`WidgetStore`] with the domain actions of a single provider
//! instance. Actions never fail outward: load errors are folded into the
//! store's `error` field, invalid timestamps are logged and skipped.
//!
//! Two subscriptions installed at creation keep `new_updates_count` in step
//! with `updates` and `last_viewed`; they live as long as the store.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::api::Endpoint;
use crate::error::{Error, Result};
use crate::store::{StateKey, StoreState, WidgetStore};
use crate::traits::ChangelogTransport;
use crate::updates::{calculate_new_updates_count, extract_widget, now_ms, transform_publications};

/// Future returned by an action handler
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Action handler: takes the optional event payload
pub type ActionHandler = Arc<dyn Fn(Option<Value>) -> ActionFuture + Send + Sync>;

/// Action names understood by the table
pub mod names {
    pub const LOAD_UPDATES: &str = "loadUpdates";
    pub const LOAD_MOCK_UPDATES: &str = "loadMockUpdates";
    pub const MARK_VIEWED: &str = "markViewed";
    pub const MARK_ALL_VIEWED: &str = "markAllViewed";
    pub const OPEN_DISPLAY: &str = "openDisplay";
    pub const CLOSE_DISPLAY: &str = "closeDisplay";
    pub const TOGGLE_DISPLAY: &str = "toggleDisplay";
    pub const CALCULATE_NEW_COUNT: &str = "calculateNewCount";
}

/// A store plus the actions allowed to mutate it
#[derive(Clone)]
pub struct ScopedStore {
    store: WidgetStore,
    actions: ScopedActions,
}

impl ScopedStore {
    /// Create a fresh store and its actions
    pub fn new(transport: Arc<dyn ChangelogTransport>, api_base: impl Into<String>) -> Self {
        let store = WidgetStore::new(StoreState::default());
        install_derived_count(&store);

        let actions = ScopedActions {
            store: store.clone(),
            transport,
            api_base: Arc::from(api_base.into()),
        };

        Self { store, actions }
    }

    /// The reactive state
    pub fn store(&self) -> &WidgetStore {
        &self.store
    }

    /// The mutating actions
    pub fn actions(&self) -> &ScopedActions {
        &self.actions
    }
}

fn install_derived_count(store: &WidgetStore) {
    for key in [StateKey::LastViewed, StateKey::Updates] {
        let weak = store.downgrade();
        // Lives until the store is disposed
        let _permanent = store.on_change(key, move |_, _| {
            if let Some(store) = weak.upgrade() {
                recompute(&store);
            }
        });
    }
}

fn recompute(store: &WidgetStore) {
    let count = calculate_new_updates_count(&store.updates(), store.last_viewed());
    store.set_new_updates_count(count);
}

/// Domain actions over one scope's store
#[derive(Clone)]
pub struct ScopedActions {
    store: WidgetStore,
    transport: Arc<dyn ChangelogTransport>,
    api_base: Arc<str>,
}

impl std::fmt::Debug for ScopedActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedActions")
            .field("transport", &self.transport.transport_name())
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl ScopedActions {
    /// Fetch updates from a slug or URL into the store
    ///
    /// Never fails: a missing source, a non-2xx status, a network error or a
    /// malformed body all end in `error = Some(..)` and `is_loading = false`.
    pub async fn load_updates(&self, slug: Option<&str>, url: Option<&str>) {
        let url = match Endpoint::resolve(&self.api_base, slug, url) {
            Ok(endpoint) => endpoint.updates_url(),
            Err(e) => {
                error!("Cannot load updates: {}", e);
                self.store.set_error(Some(e.to_string()));
                self.store.set_loading(false);
                return;
            }
        };

        self.store.set_loading(true);
        self.store.set_error(None);

        match self.transport.get_json(&url).await {
            Ok(body) => self.apply_payload(&body),
            Err(e) => {
                warn!("Failed to load updates from {}: {}", url, e);
                self.store.set_error(Some(e.to_string()));
            }
        }

        self.store.set_loading(false);
    }

    /// Load a raw payload without the network
    pub fn load_mock_updates(&self, data: &Value) {
        self.store.set_loading(true);
        self.store.set_error(None);
        self.apply_payload(data);
        self.store.set_loading(false);
    }

    fn apply_payload(&self, body: &Value) {
        match transform_publications(body) {
            Ok(updates) => {
                debug!("Loaded {} updates", updates.len());
                self.store.set_widget(extract_widget(body));
                self.store.set_updates(updates);
            }
            Err(e) => {
                warn!("Failed to parse updates payload: {}", e);
                self.store.set_error(Some(e.to_string()));
            }
        }
    }

    /// Set the last-viewed watermark (now when `None`)
    ///
    /// Non-positive timestamps are logged and ignored.
    pub fn mark_viewed(&self, timestamp: Option<i64>) {
        let timestamp = timestamp.unwrap_or_else(now_ms);
        if timestamp <= 0 {
            error!("Refusing to mark viewed with invalid timestamp {}", timestamp);
            return;
        }
        self.store.set_last_viewed(Some(timestamp));
    }

    /// Mark everything as viewed as of now
    pub fn mark_all_viewed(&self) {
        self.store.set_last_viewed(Some(now_ms()));
    }

    pub fn open_display(&self) {
        self.store.set_open(true);
    }

    pub fn close_display(&self) {
        self.store.set_open(false);
    }

    pub fn toggle_display(&self) {
        self.store.set_open(!self.store.is_open());
    }

    /// Force a recount of new updates
    pub fn calculate_new_count(&self) {
        recompute(&self.store);
    }

    /// Name-indexed table of every action
    pub fn action_table(&self) -> ActionTable {
        let mut table = ActionTable::default();

        let actions = self.clone();
        table.insert(names::LOAD_UPDATES, move |payload| {
            let actions = actions.clone();
            Box::pin(async move {
                let source: LoadSource = decode_payload(payload)?;
                actions
                    .load_updates(source.slug.as_deref(), source.url.as_deref())
                    .await;
                Ok(())
            })
        });

        let actions = self.clone();
        table.insert(names::LOAD_MOCK_UPDATES, move |payload| {
            let result = match payload {
                Some(data) => {
                    actions.load_mock_updates(&data);
                    Ok(())
                }
                None => Err(Error::invalid_input("loadMockUpdates requires a payload")),
            };
            Box::pin(async move { result })
        });

        let actions = self.clone();
        table.insert(names::MARK_VIEWED, move |payload| {
            let result = decode_timestamp(payload).map(|ts| actions.mark_viewed(ts));
            Box::pin(async move { result })
        });

        let actions = self.clone();
        table.insert_sync(names::MARK_ALL_VIEWED, move || actions.mark_all_viewed());
        let actions = self.clone();
        table.insert_sync(names::OPEN_DISPLAY, move || actions.open_display());
        let actions = self.clone();
        table.insert_sync(names::CLOSE_DISPLAY, move || actions.close_display());
        let actions = self.clone();
        table.insert_sync(names::TOGGLE_DISPLAY, move || actions.toggle_display());
        let actions = self.clone();
        table.insert_sync(names::CALCULATE_NEW_COUNT, move || actions.calculate_new_count());

        table
    }
}

#[derive(Debug, Default, Deserialize)]
struct LoadSource {
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

fn decode_payload<T: for<'de> Deserialize<'de> + Default>(payload: Option<Value>) -> Result<T> {
    match payload {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => Ok(serde_json::from_value(value)?),
    }
}

fn decode_timestamp(payload: Option<Value>) -> Result<Option<i64>> {
    match payload {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)) {
            Some(ts) if ts > 0 => Ok(Some(ts)),
            _ => Err(Error::invalid_timestamp(n.to_string())),
        },
        Some(other) => Err(Error::invalid_timestamp(other.to_string())),
    }
}

/// Name-indexed action handlers
#[derive(Clone, Default)]
pub struct ActionTable {
    handlers: BTreeMap<&'static str, ActionHandler>,
}

impl std::fmt::Debug for ActionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}

impl ActionTable {
    /// Register a handler
    pub fn insert<F>(&mut self, name: &'static str, handler: F)
    where
        F: Fn(Option<Value>) -> ActionFuture + Send + Sync + 'static,
    {
        self.handlers.insert(name, Arc::new(handler));
    }

    /// Register a handler that ignores its payload and completes immediately
    pub fn insert_sync<F>(&mut self, name: &'static str, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.insert(name, move |_payload| {
            handler();
            Box::pin(async { Ok(()) })
        });
    }

    /// Look up a handler
    pub fn get(&self, name: &str) -> Option<&ActionHandler> {
        self.handlers.get(name)
    }

    /// Whether a handler is registered
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    /// Invoke a handler by name
    ///
    /// The synchronous part of the action runs before this returns the
    /// future; the future completes any network work.
    pub fn invoke(&self, name: &str, payload: Option<Value>) -> ActionFuture {
        match self.handlers.get(name) {
            Some(handler) => handler(payload),
            None => {
                let name = name.to_string();
                Box::pin(async move { Err(Error::UnknownAction(name)) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    /// Transport that returns a fixed response and records URLs
    struct FixedTransport {
        response: Mutex<Option<Result<Value>>>,
        urls: Mutex<Vec<String>>,
    }

    impl FixedTransport {
        fn new(response: Result<Value>) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Some(response)),
                urls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChangelogTransport for FixedTransport {
        async fn get_json(&self, url: &str) -> Result<Value> {
            self.urls.lock().unwrap().push(url.to_string());
            self.response
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(Error::http("no response scripted")))
        }

        async fn patch_json(&self, _url: &str, _body: &Value) -> Result<()> {
            Ok(())
        }

        fn transport_name(&self) -> &'static str {
            "fixed"
        }
    }

    fn iso(ms: i64) -> String {
        crate::updates::format_timestamp_ms(ms).unwrap()
    }

    fn scoped(response: Result<Value>) -> (ScopedStore, Arc<FixedTransport>) {
        let transport = FixedTransport::new(response);
        let scoped = ScopedStore::new(transport.clone(), "https://api.changebot.ai/v1");
        (scoped, transport)
    }

    #[tokio::test]
    async fn load_updates_by_slug() {
        let now = now_ms();
        let (scoped, transport) = scoped(Ok(json!({
            "widget": {"title": "Acme news"},
            "publications": [{"id": 1, "title": "a", "published_at": iso(now)}]
        })));

        scoped.actions().load_updates(Some("acme"), None).await;

        let state = scoped.store().snapshot();
        assert_eq!(state.updates.len(), 1);
        assert_eq!(state.widget.unwrap().title, "Acme news");
        assert!(!state.is_loading);
        assert!(state.error.is_none());
        assert_eq!(
            transport.urls.lock().unwrap().as_slice(),
            ["https://api.changebot.ai/v1/widgets/acme/updates"]
        );
    }

    #[tokio::test]
    async fn load_updates_status_error_is_folded() {
        let (scoped, _) = scoped(Err(Error::status(503, "Service Unavailable")));
        scoped.actions().load_updates(None, Some("http://localhost/updates")).await;
        assert_eq!(scoped.store().error().as_deref(), Some("Service Unavailable"));
        assert!(!scoped.store().is_loading());
        assert!(scoped.store().updates().is_empty());
    }

    #[tokio::test]
    async fn load_updates_without_source_sets_error() {
        let (scoped, transport) = scoped(Ok(json!([])));
        scoped.actions().load_updates(None, None).await;
        assert!(scoped.store().error().is_some());
        assert!(!scoped.store().is_loading());
        assert!(transport.urls.lock().unwrap().is_empty());
    }

    #[test]
    fn loading_flag_is_set_during_load() {
        let (scoped, _) = scoped(Ok(json!([])));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = scoped.store().on_change(StateKey::IsLoading, move |value, _| {
            sink.lock().unwrap().push(value.as_flag().unwrap());
        });
        scoped.actions().load_mock_updates(&json!([]));
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn malformed_mock_data_sets_error() {
        let (scoped, _) = scoped(Ok(json!([])));
        scoped.actions().load_mock_updates(&json!(42));
        assert!(scoped.store().error().is_some());
        assert!(!scoped.store().is_loading());
    }

    #[test]
    fn one_bad_entry_does_not_drop_the_feed() {
        let now = now_ms();
        let (scoped, _) = scoped(Ok(json!([])));
        scoped.actions().load_mock_updates(&json!([
            {"id": 1, "title": "ok", "published_at": iso(now)},
            {"id": 2, "title": null, "content": null, "published_at": 12345}
        ]));
        assert!(scoped.store().error().is_none());
        assert_eq!(scoped.store().updates().len(), 2);
    }

    #[test]
    fn count_tracks_updates_and_last_viewed() {
        let now = now_ms();
        let (scoped, _) = scoped(Ok(json!([])));
        let actions = scoped.actions();

        actions.mark_viewed(Some(now - DAY_MS));
        actions.load_mock_updates(&json!([{"id": 1, "published_at": iso(now - 2 * DAY_MS)}]));
        assert_eq!(scoped.store().new_updates_count(), 0);

        actions.load_mock_updates(&json!([
            {"id": 1, "published_at": iso(now - 2 * DAY_MS)},
            {"id": 2, "published_at": iso(now)}
        ]));
        assert_eq!(scoped.store().new_updates_count(), 1);

        actions.mark_viewed(Some(now + 1));
        assert_eq!(scoped.store().new_updates_count(), 0);
    }

    #[test]
    fn mark_viewed_is_idempotent() {
        let now = now_ms();
        let (scoped, _) = scoped(Ok(json!([])));
        let actions = scoped.actions();
        actions.load_mock_updates(&json!([{"id": 1, "published_at": iso(now)}]));

        actions.mark_viewed(Some(now - 1000));
        let first = scoped.store().snapshot();
        actions.mark_viewed(Some(now - 1000));
        let second = scoped.store().snapshot();
        assert_eq!(first.last_viewed, second.last_viewed);
        assert_eq!(first.new_updates_count, second.new_updates_count);
        assert_eq!(second.new_updates_count, 1);
    }

    #[test]
    fn invalid_timestamp_is_skipped() {
        let (scoped, _) = scoped(Ok(json!([])));
        scoped.actions().mark_viewed(Some(1234));
        scoped.actions().mark_viewed(Some(0));
        assert_eq!(scoped.store().last_viewed(), Some(1234));
    }

    #[test]
    fn display_actions() {
        let (scoped, _) = scoped(Ok(json!([])));
        let actions = scoped.actions();
        actions.open_display();
        assert!(scoped.store().is_open());
        actions.toggle_display();
        assert!(!scoped.store().is_open());
        actions.toggle_display();
        actions.close_display();
        assert!(!scoped.store().is_open());
    }

    #[tokio::test]
    async fn action_table_dispatch() {
        let (scoped, _) = scoped(Ok(json!([])));
        let table = scoped.actions().action_table();

        assert!(table.contains(names::OPEN_DISPLAY));
        table.invoke(names::OPEN_DISPLAY, None).await.unwrap();
        assert!(scoped.store().is_open());

        table.invoke(names::MARK_VIEWED, Some(json!(5000))).await.unwrap();
        assert_eq!(scoped.store().last_viewed(), Some(5000));

        assert!(table.invoke(names::MARK_VIEWED, Some(json!("soon"))).await.is_err());
        assert!(matches!(
            table.invoke("explode", None).await,
            Err(Error::UnknownAction(_))
        ));
        assert!(table.invoke(names::LOAD_MOCK_UPDATES, None).await.is_err());
    }

    #[tokio::test]
    async fn load_updates_action_reads_payload() {
        let (scoped, transport) = scoped(Ok(json!([])));
        let table = scoped.actions().action_table();
        table
            .invoke(names::LOAD_UPDATES, Some(json!({"url": "http://feed/updates"})))
            .await
            .unwrap();
        assert_eq!(
            transport.urls.lock().unwrap().as_slice(),
            ["http://feed/updates"]
        );
    }
}
