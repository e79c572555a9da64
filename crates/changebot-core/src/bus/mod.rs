//! Context-request and action event bus
//!
//! Consumers and providers never hold references to each other. A consumer
//! asks the bus for the services of a scope, or fires an action at a scope;
//! providers listen on the bus and answer for their own scope only.
//!
//! ## Event Flow
//!
//! ```text
//! Consumer ── context-request{scope, callback} ──► EventBus ──► listeners (in order)
//!                                                         first match answers, stops
//!
//! Consumer ── action{type, payload?, scope?} ──► EventBus ──► listeners (in order)
//!                                                         matching scope runs it, stops
//! ```
//!
//! Nobody listening is not an error: the callback never fires and the action
//! goes nowhere. Consumers fall back to standalone mode.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::config::DEFAULT_SCOPE;
use crate::services::Services;

/// Name of the services request event
pub const CONTEXT_REQUEST_EVENT: &str = "changebot:context-request";

/// Name of the action event
pub const ACTION_EVENT: &str = "changebot:action";

/// Whether an event keeps travelling to later listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Continue,
    Stop,
}

/// A request for the services of one scope
pub struct ContextRequest {
    scope: String,
    callback: Box<dyn FnOnce(Services) + Send>,
}

impl ContextRequest {
    pub fn new<F>(scope: impl Into<String>, callback: F) -> Self
    where
        F: FnOnce(Services) + Send + 'static,
    {
        Self {
            scope: scope.into(),
            callback: Box::new(callback),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl std::fmt::Debug for ContextRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRequest")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// A named action aimed at one scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    /// Action name, e.g. `openDisplay`
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Target scope; `None` targets the default scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl ActionEvent {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: None,
            scope: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Scope this event is routed to
    pub fn target_scope(&self) -> &str {
        self.scope.as_deref().unwrap_or(DEFAULT_SCOPE)
    }
}

/// Something that answers bus events, normally a provider
#[async_trait]
pub trait BusListener: Send + Sync {
    /// Answer a services request, or `None` to let it pass
    fn on_context_request(&self, scope: &str) -> Option<Services>;

    /// Handle an action event
    async fn on_action(&self, event: &ActionEvent) -> Propagation;
}

/// Handle identifying a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// In-process event bus
///
/// Listeners are visited in registration order. The listener list is
/// snapshotted before delivery, so listeners may add or remove listeners
/// while handling an event.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn BusListener>)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start delivering events to a listener
    pub fn add_listener(&self, listener: Arc<dyn BusListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Stop delivering events to a listener
    ///
    /// Returns false if the id was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn BusListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    /// Deliver a context request
    ///
    /// The first listener that answers gets its services passed to the
    /// callback, synchronously, and no later listener sees the request.
    /// Returns whether anyone answered.
    pub fn dispatch_context_request(&self, request: ContextRequest) -> bool {
        trace!("{} for scope {}", CONTEXT_REQUEST_EVENT, request.scope);
        for listener in self.snapshot() {
            if let Some(services) = listener.on_context_request(&request.scope) {
                (request.callback)(services);
                return true;
            }
        }
        debug!("No provider answered for scope {}", request.scope);
        false
    }

    /// Ask for a scope's services
    pub fn request_services<F>(&self, scope: &str, callback: F) -> bool
    where
        F: FnOnce(Services) + Send + 'static,
    {
        self.dispatch_context_request(ContextRequest::new(scope, callback))
    }

    /// Deliver an action event
    ///
    /// Returns whether a listener stopped it, i.e. whether some provider
    /// owned the target scope.
    pub async fn dispatch_action(&self, event: ActionEvent) -> bool {
        trace!(
            "{} {} for scope {}",
            ACTION_EVENT,
            event.kind,
            event.target_scope()
        );
        for listener in self.snapshot() {
            if listener.on_action(&event).await == Propagation::Stop {
                return true;
            }
        }
        debug!(
            "No provider handled action {} for scope {}",
            event.kind,
            event.target_scope()
        );
        false
    }
}
