//! Capability bundle handed to consumers
//!
//! A [`Services`] value is what a provider registers for its scope and what a
//! context request answers with. Consumers read the store, call the display
//! and highlight handles, and go through the actions for everything else.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::scoped::{ScopedActions, ScopedStore};
use crate::store::WidgetStore;
use crate::updates::now_ms;

/// Records that the user has looked at the widget
///
/// The provider implements this with persistence and remote tracking; a bare
/// scoped store falls back to [`StoreViewRecorder`].
#[async_trait]
pub trait ViewRecorder: Send + Sync {
    /// Record a view at `timestamp` (epoch ms)
    async fn record_view(&self, timestamp: i64);
}

/// Recorder that only moves the store's watermark
#[derive(Debug, Clone)]
pub struct StoreViewRecorder {
    actions: ScopedActions,
}

impl StoreViewRecorder {
    pub fn new(actions: ScopedActions) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl ViewRecorder for StoreViewRecorder {
    async fn record_view(&self, timestamp: i64) {
        self.actions.mark_viewed(Some(timestamp));
    }
}

/// Where a provider's data comes from, as seen by consumers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub scope: String,
}

/// Open/close the display panel
#[derive(Clone)]
pub struct DisplayHandle {
    actions: ScopedActions,
    recorder: Arc<dyn ViewRecorder>,
}

impl DisplayHandle {
    /// Open the panel; opening counts as viewing
    pub async fn open(&self) {
        self.actions.open_display();
        self.recorder.record_view(now_ms()).await;
    }

    pub fn close(&self) {
        self.actions.close_display();
    }
}

/// Dismiss banner and toast highlights
#[derive(Clone)]
pub struct HighlightHandle {
    recorder: Arc<dyn ViewRecorder>,
}

impl HighlightHandle {
    pub async fn mark_banner_viewed(&self) {
        self.recorder.record_view(now_ms()).await;
    }

    pub async fn mark_toast_viewed(&self) {
        self.recorder.record_view(now_ms()).await;
    }
}

/// Everything a consumer may use for one scope
#[derive(Clone)]
pub struct Services {
    pub store: WidgetStore,
    pub actions: ScopedActions,
    pub config: ServiceConfig,
    pub display: DisplayHandle,
    pub highlight: HighlightHandle,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Services {
    /// Bundle a scoped store whose views only touch the store
    pub fn new(scoped: &ScopedStore, config: ServiceConfig) -> Self {
        let recorder = Arc::new(StoreViewRecorder::new(scoped.actions().clone()));
        Self::with_recorder(scoped, config, recorder)
    }

    /// Bundle a scoped store with a custom view recorder
    pub fn with_recorder(
        scoped: &ScopedStore,
        config: ServiceConfig,
        recorder: Arc<dyn ViewRecorder>,
    ) -> Self {
        let actions = scoped.actions().clone();
        Self {
            store: scoped.store().clone(),
            display: DisplayHandle {
                actions: actions.clone(),
                recorder: Arc::clone(&recorder),
            },
            highlight: HighlightHandle { recorder },
            actions,
            config,
        }
    }

    /// Scope these services belong to
    pub fn scope(&self) -> &str {
        &self.config.scope
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::traits::ChangelogTransport;
    use serde_json::Value;

    struct OfflineTransport;

    #[async_trait]
    impl ChangelogTransport for OfflineTransport {
        async fn get_json(&self, url: &str) -> Result<Value> {
            Err(Error::http(format!("offline: {}", url)))
        }

        async fn patch_json(&self, url: &str, _body: &Value) -> Result<()> {
            Err(Error::http(format!("offline: {}", url)))
        }

        fn transport_name(&self) -> &'static str {
            "offline"
        }
    }

    /// Services over a fresh offline store
    pub(crate) fn test_services(scope: &str) -> Services {
        let scoped = ScopedStore::new(Arc::new(OfflineTransport), crate::config::DEFAULT_API_BASE);
        Services::new(
            &scoped,
            ServiceConfig {
                scope: scope.to_string(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn opening_records_a_view() {
        let services = test_services("a");
        assert!(services.store.last_viewed().is_none());

        services.display.open().await;
        assert!(services.store.is_open());
        assert!(services.store.last_viewed().is_some());

        services.display.close();
        assert!(!services.store.is_open());
    }

    #[tokio::test]
    async fn dismissing_a_highlight_records_a_view() {
        let services = test_services("a");
        services.highlight.mark_toast_viewed().await;
        assert!(services.store.last_viewed().is_some());
    }

    #[test]
    fn config_serializes_without_empty_sources() {
        let config = ServiceConfig {
            slug: Some("acme".into()),
            scope: "default".into(),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&config).unwrap(),
            serde_json::json!({"slug": "acme", "scope": "default"})
        );
    }
}
