//! Provider controller
//!
//! One provider owns one scope. Connecting it:
//!
//! 1. Builds the scoped store and its action table
//! 2. Starts answering bus events for its scope
//! 3. Registers its services in the registry
//! 4. Hydrates the last-viewed watermark
//! 5. Loads updates from mock data, a slug or a URL
//!
//! ## Hydration
//!
//! - Identified user: the local value is applied at once and a background
//!   sync with the API runs when the cache TTL has expired
//! - Anonymous user with a stored value: the stored value is applied
//! - Anonymous first visit: the watermark is seeded to now, so nothing
//!   historical shows up as new
//!
//! Nothing here fails once `connect` has returned; network and storage
//! problems are logged and the provider keeps serving its cached state.

mod tracking;

pub use tracking::LastSeenTracker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, Endpoint};
use crate::bus::{ActionEvent, BusListener, EventBus, ListenerId, Propagation};
use crate::config::ProviderConfig;
use crate::error::Result;
use crate::registry::ServiceRegistry;
use crate::scoped::{ActionTable, ScopedStore, names};
use crate::services::{ServiceConfig, Services};
use crate::storage::SafeStorage;
use crate::store::WidgetStore;
use crate::traits::ChangelogTransport;
use crate::updates::now_ms;

/// Collaborators a provider is wired to
///
/// Built once by the embedding application and shared by every provider and
/// consumer in it.
#[derive(Clone)]
pub struct ProviderDeps {
    pub bus: Arc<EventBus>,
    pub registry: Arc<ServiceRegistry>,
    pub storage: SafeStorage,
    pub transport: Arc<dyn ChangelogTransport>,
}

impl ProviderDeps {
    /// Fresh bus and registry over the given storage and transport
    pub fn new(storage: SafeStorage, transport: Arc<dyn ChangelogTransport>) -> Self {
        Self {
            bus: Arc::new(EventBus::new()),
            registry: Arc::new(ServiceRegistry::new()),
            storage,
            transport,
        }
    }
}

impl std::fmt::Debug for ProviderDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDeps")
            .field("bus", &self.bus)
            .field("registry", &self.registry)
            .field("storage", &self.storage)
            .field("transport", &self.transport.transport_name())
            .finish()
    }
}

/// Answers bus events for one scope
struct ProviderListener {
    scope: String,
    services: Services,
    actions: ActionTable,
    tracker: Arc<LastSeenTracker>,
}

#[async_trait]
impl BusListener for ProviderListener {
    fn on_context_request(&self, scope: &str) -> Option<Services> {
        (scope == self.scope).then(|| self.services.clone())
    }

    async fn on_action(&self, event: &ActionEvent) -> Propagation {
        if event.target_scope() != self.scope {
            return Propagation::Continue;
        }

        if !self.actions.contains(&event.kind) {
            warn!("Unknown action {} for scope {}", event.kind, self.scope);
            return Propagation::Stop;
        }

        if let Err(e) = self
            .actions
            .invoke(&event.kind, event.payload.clone())
            .await
        {
            error!("Action {} failed for scope {}: {}", event.kind, self.scope, e);
        }

        if event.kind == names::OPEN_DISPLAY {
            self.tracker.set_last_viewed(now_ms()).await;
        }

        Propagation::Stop
    }
}

/// Owns one scope's store, services and view tracking
pub struct ProviderController {
    config: ProviderConfig,
    scoped: ScopedStore,
    services: Services,
    tracker: Arc<LastSeenTracker>,
    bus: Arc<EventBus>,
    registry: Arc<ServiceRegistry>,
    listener: Mutex<Option<ListenerId>>,
    disconnected: AtomicBool,
}

impl std::fmt::Debug for ProviderController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderController")
            .field("scope", &self.config.scope)
            .field("slug", &self.config.slug)
            .field("url", &self.config.url)
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

impl ProviderController {
    /// Connect a provider for `config.scope`
    ///
    /// Fails only on invalid configuration. Returns after the initial load;
    /// a background API sync may still be running.
    pub async fn connect(config: ProviderConfig, deps: ProviderDeps) -> Result<Arc<Self>> {
        config.validate()?;

        let scoped = ScopedStore::new(Arc::clone(&deps.transport), config.api_base.clone());

        let api = Endpoint::resolve(
            &config.api_base,
            config.slug.as_deref(),
            config.url.as_deref(),
        )
        .ok()
        .map(|endpoint| ApiClient::new(Arc::clone(&deps.transport), endpoint));

        let tracker = Arc::new(LastSeenTracker::new(
            config.scope.clone(),
            config.user().map(String::from),
            config.parsed_user_data(),
            deps.storage.clone(),
            api,
            scoped.actions().clone(),
            config.cache_ttl_ms(),
        ));

        let services = Services::with_recorder(
            &scoped,
            ServiceConfig {
                url: config.url.clone(),
                slug: config.slug.clone(),
                scope: config.scope.clone(),
            },
            tracker.clone(),
        );

        let listener = Arc::new(ProviderListener {
            scope: config.scope.clone(),
            services: services.clone(),
            actions: scoped.actions().action_table(),
            tracker: Arc::clone(&tracker),
        });
        let listener_id = deps.bus.add_listener(listener);
        deps.registry
            .register_store(config.scope.clone(), services.clone());

        info!("Provider connected for scope {}", config.scope);

        let controller = Arc::new(Self {
            config,
            scoped,
            services,
            tracker,
            bus: deps.bus,
            registry: deps.registry,
            listener: Mutex::new(Some(listener_id)),
            disconnected: AtomicBool::new(false),
        });

        controller.hydrate().await;
        controller.load().await;

        Ok(controller)
    }

    async fn hydrate(&self) {
        if self.tracker.user_id().is_some() {
            self.tracker.fetch_last_seen().await;
            return;
        }

        match self.tracker.get_last_viewed_time().await {
            Some(ts) => self.scoped.actions().mark_viewed(Some(ts)),
            None => {
                debug!("First anonymous visit on scope {}", self.config.scope);
                self.tracker.set_last_viewed(now_ms()).await;
            }
        }
    }

    async fn load(&self) {
        let actions = self.scoped.actions();
        if let Some(data) = &self.config.mock_data {
            actions.load_mock_updates(data);
        } else if self.config.slug.is_some() || self.config.url.is_some() {
            actions
                .load_updates(self.config.slug.as_deref(), self.config.url.as_deref())
                .await;
        } else {
            warn!(
                "Provider for scope {} has no slug, url or mock data",
                self.config.scope
            );
        }
    }

    /// Fetch updates again from the configured source
    pub async fn reload(&self) {
        self.load().await;
    }

    pub fn scope(&self) -> &str {
        &self.config.scope
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn store(&self) -> &WidgetStore {
        self.scoped.store()
    }

    pub fn tracker(&self) -> &Arc<LastSeenTracker> {
        &self.tracker
    }

    /// Record a view now (or at `timestamp`)
    pub async fn mark_viewed(&self, timestamp: Option<i64>) {
        self.tracker
            .set_last_viewed(timestamp.unwrap_or_else(now_ms))
            .await;
    }

    /// Await the background API sync started during hydration, if any
    pub async fn wait_for_background_sync(&self) {
        self.tracker.wait_for_background_sync().await;
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Stop answering for the scope and tear the store down
    ///
    /// Idempotent. Pending registry waits for the scope stay pending so a
    /// provider that reconnects under the same scope still satisfies them.
    pub fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(id) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            self.bus.remove_listener(id);
        }
        self.registry.unregister_store(&self.config.scope);
        self.tracker.abort_background_sync();
        self.scoped.store().dispose();

        info!("Provider disconnected for scope {}", self.config.scope);
    }
}
