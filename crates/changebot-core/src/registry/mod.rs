//! Scoped service registry
//!
//! Maps scope names to the [`Services`] of the provider that owns them, and
//! lets consumers that mount before their provider wait for it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use changebot_core::registry::ServiceRegistry;
//!
//! let registry = Arc::new(ServiceRegistry::new());
//!
//! // Consumer mounted first
//! let waiter = registry.wait_for_store("sidebar", Duration::from_secs(5));
//!
//! // Provider mounts later
//! registry.register_store("sidebar", services);
//!
//! let services = waiter.wait().await?;
//! ```
//!
//! ## Waiting
//!
//! - Already registered: the waiter is ready immediately
//! - Already pending: the new waiter joins the existing wait and shares its
//!   deadline (one timer per scope)
//! - Otherwise: a new pending wait is created with its own deadline
//!
//! Each pending wait arms a timer task on the current Tokio runtime, so an
//! expired wait leaves the registry even when nobody is awaiting it. The
//! timer is aborted as soon as the entry is removed for any other reason.
//!
//! Registration resolves every waiter of that scope before `register_store`
//! returns. Unregistration leaves pending waits alone so a waiter resolves
//! against whichever provider registers next.
//!
//! ## Thread Safety
//!
//! The registry uses interior mutability with a Mutex; it is passed around
//! as an `Arc` rather than living in a global.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{Notify, watch};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::services::Services;

/// Default wait timeout for consumers
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Shared state of one scope's pending wait
#[derive(Clone)]
enum WaitState {
    Pending,
    Resolved(Services),
    TimedOut,
}

struct PendingWait {
    generation: u64,
    tx: watch::Sender<WaitState>,
    deadline: Instant,
    timeout_ms: u64,
    /// Live (not cancelled) waiters sharing this entry
    waiters: usize,
    timer: Option<AbortHandle>,
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct RegistryState {
    stores: HashMap<String, Services>,
    pending: HashMap<String, PendingWait>,
    next_generation: u64,
}

/// Scope → services registry
#[derive(Default)]
pub struct ServiceRegistry {
    state: Mutex<RegistryState>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ServiceRegistry")
            .field("scopes", &state.stores.keys().collect::<Vec<_>>())
            .field("pending", &state.pending.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a scope's services and resolve its waiters
    pub fn register_store(&self, scope: impl Into<String>, services: Services) {
        let scope = scope.into();
        let mut state = self.lock();
        if state.stores.insert(scope.clone(), services.clone()).is_some() {
            warn!("Scope {} was already registered, replacing its services", scope);
        }
        if let Some(pending) = state.pending.remove(&scope) {
            debug!("Resolving {} waiter(s) for scope {}", pending.waiters, scope);
            pending.tx.send_replace(WaitState::Resolved(services));
        }
    }

    /// Remove a scope's services
    ///
    /// Pending waiters are left untouched.
    pub fn unregister_store(&self, scope: &str) -> Option<Services> {
        self.lock().stores.remove(scope)
    }

    /// Check if a scope is registered
    pub fn has_store(&self, scope: &str) -> bool {
        self.lock().stores.contains_key(scope)
    }

    /// Get a scope's services without waiting
    pub fn get_store(&self, scope: &str) -> Option<Services> {
        self.lock().stores.get(scope).cloned()
    }

    /// List registered scopes
    pub fn scopes(&self) -> Vec<String> {
        self.lock().stores.keys().cloned().collect()
    }

    /// Whether a wait is pending for a scope
    pub fn is_pending(&self, scope: &str) -> bool {
        self.lock().pending.contains_key(scope)
    }

    /// Number of scopes with a pending wait
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Wait until a scope is registered
    ///
    /// See the module docs for how concurrent waits are shared.
    pub fn wait_for_store(self: &Arc<Self>, scope: &str, timeout: Duration) -> StoreWaiter {
        let mut state = self.lock();

        let cancel = WaitCancel {
            scope: scope.to_string(),
            generation: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            registry: Arc::downgrade(self),
        };

        if let Some(services) = state.stores.get(scope) {
            return StoreWaiter {
                kind: WaiterKind::Ready(services.clone()),
                cancel,
            };
        }

        let now = Instant::now();
        if let Some(pending) = state.pending.get_mut(scope) {
            if pending.deadline > now {
                pending.waiters += 1;
                return StoreWaiter {
                    kind: WaiterKind::Pending {
                        rx: pending.tx.subscribe(),
                        deadline: pending.deadline,
                        timeout_ms: pending.timeout_ms,
                    },
                    cancel: WaitCancel {
                        generation: Some(pending.generation),
                        ..cancel
                    },
                };
            }
        }

        // Stale entries nobody awaited past their deadline are replaced
        if let Some(stale) = state.pending.remove(scope) {
            stale.tx.send_replace(WaitState::TimedOut);
        }

        let generation = state.next_generation;
        state.next_generation += 1;

        let (tx, rx) = watch::channel(WaitState::Pending);
        let deadline = now + timeout;
        let timeout_ms = timeout.as_millis() as u64;
        let timer = self.arm_timer(scope, generation, deadline);
        state.pending.insert(
            scope.to_string(),
            PendingWait {
                generation,
                tx,
                deadline,
                timeout_ms,
                waiters: 1,
                timer,
            },
        );

        StoreWaiter {
            kind: WaiterKind::Pending {
                rx,
                deadline,
                timeout_ms,
            },
            cancel: WaitCancel {
                generation: Some(generation),
                ..cancel
            },
        }
    }

    /// Drop every registration and pending wait
    ///
    /// Intended for tests; pending waiters settle as cancelled.
    pub fn clear_registry(&self) {
        let mut state = self.lock();
        state.stores.clear();
        state.pending.clear();
    }

    /// Spawn the task that expires a pending wait at its deadline
    ///
    /// Outside a runtime there is no timer; the wait then expires when it is
    /// awaited or replaced.
    fn arm_timer(
        self: &Arc<Self>,
        scope: &str,
        generation: u64,
        deadline: Instant,
    ) -> Option<AbortHandle> {
        let Ok(handle) = Handle::try_current() else {
            debug!("No runtime for wait timer on scope {}", scope);
            return None;
        };
        let registry = Arc::downgrade(self);
        let scope = scope.to_string();
        let task = handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(registry) = registry.upgrade() {
                registry.expire(&scope, generation);
            }
        });
        Some(task.abort_handle())
    }

    /// Time out a pending wait if it is still the given generation
    fn expire(&self, scope: &str, generation: u64) {
        let mut state = self.lock();
        if state
            .pending
            .get(scope)
            .is_some_and(|pending| pending.generation == generation)
        {
            if let Some(pending) = state.pending.remove(scope) {
                warn!(
                    "No provider registered for scope {} within {}ms",
                    scope, pending.timeout_ms
                );
                pending.tx.send_replace(WaitState::TimedOut);
            }
        }
    }

    /// Release one waiter's share of a pending wait
    fn release(&self, scope: &str, generation: u64) {
        let mut state = self.lock();
        let Some(pending) = state.pending.get_mut(scope) else {
            return;
        };
        if pending.generation != generation {
            return;
        }
        pending.waiters = pending.waiters.saturating_sub(1);
        if pending.waiters == 0 {
            state.pending.remove(scope);
        }
    }
}

enum WaiterKind {
    Ready(Services),
    Pending {
        rx: watch::Receiver<WaitState>,
        deadline: Instant,
        timeout_ms: u64,
    },
}

/// Cancels one waiter
///
/// Cloneable so the cancel side can live apart from the awaiting task.
#[derive(Clone)]
pub struct WaitCancel {
    scope: String,
    generation: Option<u64>,
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
    registry: Weak<ServiceRegistry>,
}

impl WaitCancel {
    /// Cancel the waiter
    ///
    /// Idempotent and safe after the waiter settled. Only this waiter is
    /// affected: a shared pending wait is dropped only when its last live
    /// waiter cancels, and only if it is still the current wait for the
    /// scope.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_one();
        if let (Some(generation), Some(registry)) = (self.generation, self.registry.upgrade()) {
            registry.release(&self.scope, generation);
        }
    }

    /// Whether cancel has been called
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Handle returned by [`ServiceRegistry::wait_for_store`]
pub struct StoreWaiter {
    kind: WaiterKind,
    cancel: WaitCancel,
}

impl StoreWaiter {
    /// Scope being waited for
    pub fn scope(&self) -> &str {
        &self.cancel.scope
    }

    /// Whether the services were already registered
    pub fn is_ready(&self) -> bool {
        matches!(self.kind, WaiterKind::Ready(_))
    }

    /// Cancel this waiter
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Detached cancel handle
    pub fn cancel_handle(&self) -> WaitCancel {
        self.cancel.clone()
    }

    /// Wait for the services
    ///
    /// # Returns
    ///
    /// - `Ok(Services)`: the scope was (or became) registered
    /// - `Err(Error::NoProvider)`: the shared deadline passed first
    /// - `Err(Error::WaitCancelled)`: this waiter was cancelled, or the
    ///   registry was cleared
    pub async fn wait(self) -> Result<Services> {
        let StoreWaiter { kind, cancel } = self;

        let (mut rx, deadline, timeout_ms) = match kind {
            WaiterKind::Ready(services) => {
                return if cancel.is_cancelled() {
                    Err(Error::WaitCancelled {
                        scope: cancel.scope.clone(),
                    })
                } else {
                    Ok(services)
                };
            }
            WaiterKind::Pending {
                rx,
                deadline,
                timeout_ms,
            } => (rx, deadline, timeout_ms),
        };

        loop {
            if cancel.is_cancelled() {
                return Err(Error::WaitCancelled {
                    scope: cancel.scope.clone(),
                });
            }

            match &*rx.borrow_and_update() {
                WaitState::Resolved(services) => return Ok(services.clone()),
                WaitState::TimedOut => return Err(Error::no_provider(&cancel.scope, timeout_ms)),
                WaitState::Pending => {}
            }

            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Sender gone: either the final value is already in, or the wait was dropped
                        if let WaitState::Resolved(services) = &*rx.borrow() {
                            if !cancel.is_cancelled() {
                                return Ok(services.clone());
                            }
                        }
                        return Err(Error::WaitCancelled { scope: cancel.scope.clone() });
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    if let Some(generation) = cancel.generation {
                        if let Some(registry) = cancel.registry.upgrade() {
                            registry.expire(&cancel.scope, generation);
                        }
                    }
                    if let WaitState::Resolved(services) = &*rx.borrow() {
                        return Ok(services.clone());
                    }
                    return Err(Error::no_provider(&cancel.scope, timeout_ms));
                }
                _ = cancel.notify.notified() => {}
            }
        }
    }
}
