//! Consumer side of the bus
//!
//! A [`WidgetConsumer`] is what a badge, banner, toast or panel holds. It
//! finds its provider through the bus (or waits for it through the
//! registry), subscribes to the store keys it renders, and sends actions
//! back. Without a provider it runs in standalone mode: reads come back
//! empty and dispatches go nowhere.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::bus::{ActionEvent, EventBus};
use crate::registry::ServiceRegistry;
use crate::services::Services;
use crate::store::{StateKey, StateValue, Subscription};
use crate::updates::{HighlightTarget, Update, find_highlighted_update};

/// A widget attached to one scope
pub struct WidgetConsumer {
    scope: String,
    bus: Arc<EventBus>,
    services: Option<Services>,
    subscriptions: Vec<Subscription>,
}

impl std::fmt::Debug for WidgetConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetConsumer")
            .field("scope", &self.scope)
            .field("standalone", &self.is_standalone())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl WidgetConsumer {
    /// Ask the bus for the scope's services
    ///
    /// Never blocks. If no provider answers the consumer is standalone.
    pub fn connect(bus: Arc<EventBus>, scope: impl Into<String>) -> Self {
        let scope = scope.into();
        let slot = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&slot);
        bus.request_services(&scope, move |services| {
            *sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(services);
        });

        let services = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        if services.is_none() {
            debug!("No provider for scope {}, running standalone", scope);
        }

        Self {
            scope,
            bus,
            services,
            subscriptions: Vec::new(),
        }
    }

    /// Wait for the scope's provider through the registry
    ///
    /// Falls back to standalone mode when the wait times out.
    pub async fn connect_when_ready(
        bus: Arc<EventBus>,
        registry: &Arc<ServiceRegistry>,
        scope: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let scope = scope.into();
        let services = match registry.wait_for_store(&scope, timeout).wait().await {
            Ok(services) => Some(services),
            Err(e) => {
                warn!("{}; running standalone", e);
                None
            }
        };

        Self {
            scope,
            bus,
            services,
            subscriptions: Vec::new(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn is_standalone(&self) -> bool {
        self.services.is_none()
    }

    pub fn services(&self) -> Option<&Services> {
        self.services.as_ref()
    }

    /// Subscribe to one store key for the consumer's lifetime
    ///
    /// Returns false in standalone mode.
    pub fn subscribe<F>(&mut self, key: StateKey, callback: F) -> bool
    where
        F: Fn(&StateValue, Option<&StateValue>) + Send + Sync + 'static,
    {
        let Some(services) = &self.services else {
            return false;
        };
        self.subscriptions.push(services.store.on_change(key, callback));
        true
    }

    /// Fire an action at this consumer's scope
    ///
    /// Returns whether a provider handled it.
    pub async fn dispatch(&self, kind: &str, payload: Option<Value>) -> bool {
        let mut event = ActionEvent::new(kind).with_scope(self.scope.clone());
        event.payload = payload;
        self.bus.dispatch_action(event).await
    }

    /// Current count of unseen updates, 0 when standalone
    pub fn new_updates_count(&self) -> usize {
        self.services
            .as_ref()
            .map_or(0, |services| services.store.new_updates_count())
    }

    /// Drop every subscription and the services
    pub fn disconnect(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        self.services = None;
    }
}

impl Drop for WidgetConsumer {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Remembers which update a banner or toast is showing
///
/// Reports each newly highlighted update once, so re-checking after an
/// unrelated store change does not show the same entry again.
#[derive(Debug, Clone)]
pub struct HighlightTracker {
    target: HighlightTarget,
    current_id: Option<i64>,
}

impl HighlightTracker {
    pub fn new(target: HighlightTarget) -> Self {
        Self {
            target,
            current_id: None,
        }
    }

    pub fn target(&self) -> HighlightTarget {
        self.target
    }

    /// Id of the update currently shown
    pub fn current_id(&self) -> Option<i64> {
        self.current_id
    }

    /// Check for an update to show
    ///
    /// Returns the update only when it differs from the one already shown.
    pub fn check(&mut self, updates: &[Update], last_viewed: Option<i64>) -> Option<Update> {
        let found = find_highlighted_update(updates, self.target, last_viewed, self.current_id);
        if !found.should_show {
            return None;
        }
        let update = found.new_update?;
        self.current_id = Some(update.id);
        Some(update)
    }

    /// Check against a provider's current state
    pub fn check_services(&mut self, services: &Services) -> Option<Update> {
        self.check(&services.store.updates(), services.store.last_viewed())
    }

    /// Dismiss the shown update and record the view
    pub async fn dismiss(&mut self, services: &Services) {
        match self.target {
            HighlightTarget::Banner => services.highlight.mark_banner_viewed().await,
            HighlightTarget::Toast => services.highlight.mark_toast_viewed().await,
        }
        self.current_id = None;
    }
}
