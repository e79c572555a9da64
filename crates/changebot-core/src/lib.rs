// # changebot-core
//
// Core library for the Changebot "what's new" widget suite.
//
// ## Architecture Overview
//
// Several independent widgets (badge, banner, toast, panel) share one
// provider's state per scope without holding references to each other:
// - **ReactiveStore / WidgetStore**: per-scope state with synchronous change subscriptions
// - **ScopedStore**: the store plus the action table that is allowed to mutate it
// - **ServiceRegistry**: scope → services, with cancellable waits for late providers
// - **EventBus**: context requests and action events between consumers and providers
// - **ProviderController**: loads updates, hydrates and syncs the last-viewed watermark
// - **PersistedStorage / ChangelogTransport**: traits for storage and HTTP backends
//
// ## Design Principles
//
// 1. **Scope Isolation**: every key, registration and event carries its scope
// 2. **Log and Degrade**: network and storage failures end up in logs or store state
// 3. **Explicit Wiring**: bus, registry and storage are passed in, never global
// 4. **Library-First**: the CLI and demos are thin layers over this crate

pub mod api;
pub mod bus;
pub mod config;
pub mod consumer;
pub mod error;
pub mod provider;
pub mod registry;
pub mod scoped;
pub mod services;
pub mod storage;
pub mod store;
pub mod traits;
pub mod updates;

// Re-export core types for convenience
pub use api::{ApiClient, Endpoint, UserTracking};
pub use bus::{ActionEvent, BusListener, EventBus, Propagation};
pub use config::{ProviderConfig, StorageConfig};
pub use consumer::{HighlightTracker, WidgetConsumer};
pub use error::{Error, Result};
pub use provider::{LastSeenTracker, ProviderController, ProviderDeps};
pub use registry::{ServiceRegistry, StoreWaiter};
pub use scoped::{ActionTable, ScopedActions, ScopedStore};
pub use services::{ServiceConfig, Services, ViewRecorder};
pub use storage::{FileStorage, MemoryStorage, SafeStorage};
pub use store::{ReactiveStore, StateKey, StateValue, StoreState, Subscription, WidgetStore};
pub use traits::{ChangelogTransport, PersistedStorage};
pub use updates::{HighlightTarget, Tag, Update, Widget};
