//! Typed per-scope widget state on top of [`ReactiveStore`]

use serde::Serialize;

use super::{ChangeStream, ReactiveStore, Subscription, WeakReactiveStore};
use crate::updates::{Update, Widget};

/// Keys of the per-scope state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StateKey {
    Updates,
    Widget,
    LastViewed,
    IsOpen,
    NewUpdatesCount,
    IsLoading,
    Error,
}

impl StateKey {
    /// Every key, in declaration order
    pub const ALL: [StateKey; 7] = [
        StateKey::Updates,
        StateKey::Widget,
        StateKey::LastViewed,
        StateKey::IsOpen,
        StateKey::NewUpdatesCount,
        StateKey::IsLoading,
        StateKey::Error,
    ];
}

/// Values of the per-scope state, one variant per key
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Updates(Vec<Update>),
    Widget(Option<Widget>),
    LastViewed(Option<i64>),
    IsOpen(bool),
    NewUpdatesCount(usize),
    IsLoading(bool),
    Error(Option<String>),
}

impl StateValue {
    /// Key this value belongs to
    pub fn key(&self) -> StateKey {
        match self {
            StateValue::Updates(_) => StateKey::Updates,
            StateValue::Widget(_) => StateKey::Widget,
            StateValue::LastViewed(_) => StateKey::LastViewed,
            StateValue::IsOpen(_) => StateKey::IsOpen,
            StateValue::NewUpdatesCount(_) => StateKey::NewUpdatesCount,
            StateValue::IsLoading(_) => StateKey::IsLoading,
            StateValue::Error(_) => StateKey::Error,
        }
    }

    pub fn as_updates(&self) -> Option<&[Update]> {
        match self {
            StateValue::Updates(updates) => Some(updates),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<usize> {
        match self {
            StateValue::NewUpdatesCount(count) => Some(*count),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            StateValue::IsOpen(flag) | StateValue::IsLoading(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_last_viewed(&self) -> Option<Option<i64>> {
        match self {
            StateValue::LastViewed(ts) => Some(*ts),
            _ => None,
        }
    }
}

/// Plain snapshot of the per-scope state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    pub updates: Vec<Update>,
    pub widget: Option<Widget>,
    /// Epoch ms; `None` means never viewed
    pub last_viewed: Option<i64>,
    pub is_open: bool,
    /// Derived from `updates` and `last_viewed`
    pub new_updates_count: usize,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            updates: Vec::new(),
            widget: None,
            last_viewed: None,
            is_open: false,
            new_updates_count: 0,
            is_loading: false,
            error: None,
        }
    }
}

impl StoreState {
    fn into_entries(self) -> Vec<(StateKey, StateValue)> {
        vec![
            (StateKey::Updates, StateValue::Updates(self.updates)),
            (StateKey::Widget, StateValue::Widget(self.widget)),
            (StateKey::LastViewed, StateValue::LastViewed(self.last_viewed)),
            (StateKey::IsOpen, StateValue::IsOpen(self.is_open)),
            (
                StateKey::NewUpdatesCount,
                StateValue::NewUpdatesCount(self.new_updates_count),
            ),
            (StateKey::IsLoading, StateValue::IsLoading(self.is_loading)),
            (StateKey::Error, StateValue::Error(self.error)),
        ]
    }
}

/// Reactive per-scope widget state
///
/// Consumers read and subscribe; only the scoped action table writes.
#[derive(Clone)]
pub struct WidgetStore {
    inner: ReactiveStore<StateKey, StateValue>,
}

impl std::fmt::Debug for WidgetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetStore")
            .field("state", &self.snapshot())
            .finish()
    }
}

impl WidgetStore {
    /// Create a store holding `initial`
    pub fn new(initial: StoreState) -> Self {
        Self {
            inner: ReactiveStore::new(initial.into_entries()),
        }
    }

    pub fn updates(&self) -> Vec<Update> {
        match self.inner.get(&StateKey::Updates) {
            Some(StateValue::Updates(updates)) => updates,
            _ => Vec::new(),
        }
    }

    pub fn widget(&self) -> Option<Widget> {
        match self.inner.get(&StateKey::Widget) {
            Some(StateValue::Widget(widget)) => widget,
            _ => None,
        }
    }

    pub fn last_viewed(&self) -> Option<i64> {
        match self.inner.get(&StateKey::LastViewed) {
            Some(StateValue::LastViewed(ts)) => ts,
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.inner.get(&StateKey::IsOpen), Some(StateValue::IsOpen(true)))
    }

    pub fn new_updates_count(&self) -> usize {
        match self.inner.get(&StateKey::NewUpdatesCount) {
            Some(StateValue::NewUpdatesCount(count)) => count,
            _ => 0,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(
            self.inner.get(&StateKey::IsLoading),
            Some(StateValue::IsLoading(true))
        )
    }

    pub fn error(&self) -> Option<String> {
        match self.inner.get(&StateKey::Error) {
            Some(StateValue::Error(error)) => error,
            _ => None,
        }
    }

    /// Copy of every field
    pub fn snapshot(&self) -> StoreState {
        StoreState {
            updates: self.updates(),
            widget: self.widget(),
            last_viewed: self.last_viewed(),
            is_open: self.is_open(),
            new_updates_count: self.new_updates_count(),
            is_loading: self.is_loading(),
            error: self.error(),
        }
    }

    /// Subscribe to writes of one key
    pub fn on_change<F>(&self, key: StateKey, callback: F) -> Subscription
    where
        F: Fn(&StateValue, Option<&StateValue>) + Send + Sync + 'static,
    {
        self.inner.on_change(key, callback)
    }

    /// Stream of values written to one key
    pub fn changes(&self, key: StateKey) -> ChangeStream<StateValue> {
        self.inner.changes(key)
    }

    /// Restore the initial state, notifying subscribers
    pub fn reset(&self) {
        self.inner.reset();
    }

    /// Drop all subscribers and restore the initial state
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub(crate) fn downgrade(&self) -> WeakWidgetStore {
        WeakWidgetStore {
            inner: self.inner.downgrade(),
        }
    }

    pub(crate) fn set(&self, value: StateValue) {
        self.inner.set(value.key(), value);
    }

    pub(crate) fn set_updates(&self, updates: Vec<Update>) {
        self.set(StateValue::Updates(updates));
    }

    pub(crate) fn set_widget(&self, widget: Option<Widget>) {
        self.set(StateValue::Widget(widget));
    }

    pub(crate) fn set_last_viewed(&self, ts: Option<i64>) {
        self.set(StateValue::LastViewed(ts));
    }

    pub(crate) fn set_open(&self, open: bool) {
        self.set(StateValue::IsOpen(open));
    }

    pub(crate) fn set_new_updates_count(&self, count: usize) {
        self.set(StateValue::NewUpdatesCount(count));
    }

    pub(crate) fn set_loading(&self, loading: bool) {
        self.set(StateValue::IsLoading(loading));
    }

    pub(crate) fn set_error(&self, error: Option<String>) {
        self.set(StateValue::Error(error));
    }
}

/// Non-owning handle to a [`WidgetStore`]
#[derive(Clone)]
pub(crate) struct WeakWidgetStore {
    inner: WeakReactiveStore<StateKey, StateValue>,
}

impl WeakWidgetStore {
    pub(crate) fn upgrade(&self) -> Option<WidgetStore> {
        self.inner.upgrade().map(|inner| WidgetStore { inner })
    }
}

impl Default for WidgetStore {
    fn default() -> Self {
        Self::new(StoreState::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn value_key_matches_variant() {
        for (key, value) in StoreState::default().into_entries() {
            assert_eq!(value.key(), key);
        }
    }

    #[test]
    fn typed_getters_read_initial_state() {
        let store = WidgetStore::default();
        assert_eq!(store.snapshot(), StoreState::default());
    }

    #[test]
    fn typed_setters_notify_their_key() {
        let store = WidgetStore::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = store.on_change(StateKey::IsOpen, move |value, _| {
            sink.lock().unwrap().push(value.as_flag());
        });

        store.set_open(true);
        store.set_loading(true);
        store.set_open(false);

        assert_eq!(*seen.lock().unwrap(), vec![Some(true), Some(false)]);
        assert!(store.is_loading());
    }
}
