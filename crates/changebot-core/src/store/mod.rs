//! Reactive store
//!
//! A mutable key/value container with per-key change subscriptions.
//!
//! ## Notification Model
//!
//! - A write invokes every subscriber of that key before `set` returns
//! - Subscribers run in subscription order
//! - No batching or coalescing: two writes fire twice
//! - Subscribers may read and write the store, and may unsubscribe
//!   themselves (or others); the store lock is never held while a
//!   subscriber runs
//!
//! Derived fields rely on this: a subscriber on one key can write another
//! key and every reader sees the derived value as soon as the first write
//! returns.

pub mod widget;

pub use widget::{StateKey, StateValue, StoreState, WidgetStore};

use std::collections::HashMap;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Subscriber callback: `(new, old)`
pub type Listener<V> = Arc<dyn Fn(&V, Option<&V>) + Send + Sync>;

struct Entry<V> {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Listener<V>,
}

impl<V> Clone for Entry<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            active: Arc::clone(&self.active),
            callback: Arc::clone(&self.callback),
        }
    }
}

struct Inner<K, V> {
    values: HashMap<K, V>,
    initial: HashMap<K, V>,
    listeners: HashMap<K, Vec<Entry<V>>>,
    next_id: u64,
}

/// Observable key/value container
///
/// Cloning yields another handle to the same store.
pub struct ReactiveStore<K, V> {
    inner: Arc<Mutex<Inner<K, V>>>,
}

impl<K, V> Clone for ReactiveStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> ReactiveStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a store from its initial state
    pub fn new(initial: impl IntoIterator<Item = (K, V)>) -> Self {
        let initial: HashMap<K, V> = initial.into_iter().collect();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                values: initial.clone(),
                initial,
                listeners: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current value of a key
    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().values.get(key).cloned()
    }

    /// Write a key and notify its subscribers synchronously
    pub fn set(&self, key: K, value: V) {
        let (old, entries) = {
            let mut inner = self.lock();
            let old = inner.values.insert(key.clone(), value.clone());
            let entries = inner.listeners.get(&key).cloned().unwrap_or_default();
            (old, entries)
        };
        notify(&entries, &value, old.as_ref());
    }

    /// Subscribe to writes of one key
    pub fn on_change<F>(&self, key: K, callback: F) -> Subscription
    where
        F: Fn(&V, Option<&V>) + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.entry(key.clone()).or_default().push(Entry {
                id,
                active: Arc::clone(&active),
                callback: Arc::new(callback),
            });
            id
        };

        let weak: Weak<Mutex<Inner<K, V>>> = Arc::downgrade(&self.inner);
        let detach: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(entries) = inner.listeners.get_mut(&key) {
                    entries.retain(|entry| entry.id != id);
                }
            }
        });

        Subscription { active, detach }
    }

    /// Stream of values written to one key
    ///
    /// The subscription ends when the stream is dropped.
    pub fn changes(&self, key: K) -> ChangeStream<V> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.on_change(key, move |value: &V, _old: Option<&V>| {
            let _ = tx.send(value.clone());
        });
        ChangeStream {
            inner: UnboundedReceiverStream::new(rx),
            subscription,
        }
    }

    /// Restore the initial state, notifying subscribers of every key
    pub fn reset(&self) {
        let notifications = {
            let mut inner = self.lock();
            let initial = inner.initial.clone();
            let mut notifications = Vec::with_capacity(initial.len());
            for (key, value) in initial {
                let old = inner.values.insert(key.clone(), value.clone());
                let entries = inner.listeners.get(&key).cloned().unwrap_or_default();
                notifications.push((entries, value, old));
            }
            notifications
        };
        for (entries, value, old) in notifications {
            notify(&entries, &value, old.as_ref());
        }
    }

    /// Drop every subscriber and restore the initial state silently
    pub fn dispose(&self) {
        let mut inner = self.lock();
        for entries in inner.listeners.values() {
            for entry in entries {
                entry.active.store(false, Ordering::SeqCst);
            }
        }
        inner.listeners.clear();
        inner.values = inner.initial.clone();
    }

    /// Number of live subscribers for a key
    pub fn subscriber_count(&self, key: &K) -> usize {
        self.lock().listeners.get(key).map_or(0, Vec::len)
    }

    /// Non-owning handle, for subscribers that write back into this store
    pub fn downgrade(&self) -> WeakReactiveStore<K, V> {
        WeakReactiveStore {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning handle to a [`ReactiveStore`]
pub struct WeakReactiveStore<K, V> {
    inner: Weak<Mutex<Inner<K, V>>>,
}

impl<K, V> Clone for WeakReactiveStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<K, V> WeakReactiveStore<K, V> {
    /// Get the store back if it is still alive
    pub fn upgrade(&self) -> Option<ReactiveStore<K, V>> {
        self.inner.upgrade().map(|inner| ReactiveStore { inner })
    }
}

fn notify<V>(entries: &[Entry<V>], value: &V, old: Option<&V>) {
    for entry in entries {
        // Re-checked per call: an earlier subscriber may have unsubscribed this one
        if entry.active.load(Ordering::SeqCst) {
            (entry.callback)(value, old);
        }
    }
}

/// Handle returned by [`ReactiveStore::on_change`]
///
/// Dropping the handle keeps the subscription alive; call
/// [`unsubscribe`](Subscription::unsubscribe) to end it.
#[must_use = "dropping a Subscription does not unsubscribe; keep it to call unsubscribe()"]
pub struct Subscription {
    active: Arc<AtomicBool>,
    detach: Arc<dyn Fn() + Send + Sync>,
}

impl Subscription {
    /// Stop receiving notifications
    ///
    /// Idempotent, and safe to call from inside the subscriber itself.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            (self.detach)();
        }
    }

    /// Whether the subscription still receives notifications
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Clone for Subscription {
    fn clone(&self) -> Self {
        Self {
            active: Arc::clone(&self.active),
            detach: Arc::clone(&self.detach),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Stream returned by [`ReactiveStore::changes`]
pub struct ChangeStream<V> {
    inner: UnboundedReceiverStream<V>,
    subscription: Subscription,
}

impl<V> Stream for ChangeStream<V> {
    type Item = V;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<V>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<V> Drop for ChangeStream<V> {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}
