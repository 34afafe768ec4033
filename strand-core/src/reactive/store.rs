//! Store
//!
//! The store is the central coordinator: it owns the key/value state, the
//! per-key listener registry, the pending write batch and the dependency
//! tracker shared by everything defined on it.
//!
//! # How It Works
//!
//! 1. `set_key` writes into the pending batch. The first write of a batch
//!    asks the scheduler to flush later. Reads see the new value at once.
//!
//! 2. `flush` takes the batch, applies it to the committed state and
//!    collects the keys whose value actually changed.
//!
//! 3. Listeners of all changed keys are gathered into one set keyed by
//!    listener id, so a listener under several changed keys runs once.
//!
//! 4. Listeners run in registration order. Anything they write lands in a
//!    fresh batch which the same `flush` call drains before returning.
//!
//! # Threading
//!
//! Stores are single-threaded (`Rc` + `RefCell`). No borrow of internal
//! state is held while user code (listeners, scheduled tasks) runs.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde_json::Value;

use super::atom::Atom;
use super::listener::{Listener, ListenerId, ListenerIds};
use super::scheduler::{FlushScheduler, ManualFlush};
use super::tracker::Tracker;
use crate::config::StoreConfig;
use crate::error::{Error, Result};

/// Committed state as handed out by [`Store::get_all`].
pub type Snapshot = Rc<HashMap<String, Value>>;

pub(crate) struct StoreInner {
    config: StoreConfig,
    tracker: Tracker,
    scheduler: Box<dyn FlushScheduler>,

    state: RefCell<HashMap<String, Value>>,
    pending: RefCell<Option<IndexMap<String, Value>>>,
    snapshot: RefCell<Option<Snapshot>>,

    listeners: RefCell<HashMap<String, IndexMap<ListenerId, Listener>>>,
    listener_ids: ListenerIds,

    names: RefCell<HashSet<String>>,
    path_versions: RefCell<HashMap<String, BTreeMap<String, Atom>>>,
    anon_counter: Cell<usize>,
    flushing: Cell<bool>,
}

/// Handle to a reactive store. Clones share the same store.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

/// Weak handle kept by atoms and selects so they do not keep a store alive.
#[derive(Clone, Default)]
pub(crate) struct WeakStore(Weak<StoreInner>);

impl WeakStore {
    pub(crate) fn upgrade(&self) -> Option<Store> {
        self.0.upgrade().map(|inner| Store { inner })
    }
}

/// Name and store assigned to a member at store setup.
pub(crate) struct Binding {
    pub(crate) name: String,
    pub(crate) store: WeakStore,
}

impl Binding {
    /// Resolve a member's binding, failing if setup has not happened yet or
    /// the store is gone.
    pub(crate) fn resolve(
        slot: &RefCell<Option<Binding>>,
        operation: &'static str,
    ) -> Result<(String, Store)> {
        let binding = slot.borrow();
        let binding = binding
            .as_ref()
            .ok_or(Error::Uninitialized { operation })?;
        let store = binding
            .store
            .upgrade()
            .ok_or(Error::Uninitialized { operation })?;
        Ok((binding.name.clone(), store))
    }
}

/// Removes a listener from every key it was subscribed under.
///
/// Calling it more than once is harmless. Dropping it does *not*
/// unsubscribe.
#[derive(Clone)]
pub struct Unsubscribe {
    store: WeakStore,
    id: ListenerId,
    keys: Vec<String>,
}

impl Unsubscribe {
    /// An unsubscribe handle that does nothing.
    pub(crate) fn noop() -> Self {
        Self {
            store: WeakStore::default(),
            id: ListenerIds::default().next(),
            keys: Vec::new(),
        }
    }

    /// Remove the subscription.
    pub fn unsubscribe(&self) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let mut listeners = store.inner.listeners.borrow_mut();
        for key in &self.keys {
            if let Some(entries) = listeners.get_mut(key) {
                entries.shift_remove(&self.id);
                if entries.is_empty() {
                    listeners.remove(key);
                }
            }
        }
        tracing::trace!(listener = self.id.raw(), keys = ?self.keys, "unsubscribed");
    }

    /// Keys this subscription covers.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("id", &self.id)
            .field("keys", &self.keys)
            .finish()
    }
}

/// Resets the re-entrancy flag even if a listener panics out of `flush`.
struct FlushingGuard<'a>(&'a Cell<bool>);

impl Drop for FlushingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Store {
    /// Create an empty store flushed manually.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_scheduler(config, ManualFlush)
    }

    /// Create an empty store using `scheduler` for automatic flushes.
    pub fn with_scheduler(config: StoreConfig, scheduler: impl FlushScheduler + 'static) -> Self {
        Self::from_boxed(config, Box::new(scheduler))
    }

    pub(crate) fn from_boxed(config: StoreConfig, scheduler: Box<dyn FlushScheduler>) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                config,
                tracker: Tracker::new(),
                scheduler,
                state: RefCell::new(HashMap::new()),
                pending: RefCell::new(None),
                snapshot: RefCell::new(None),
                listeners: RefCell::new(HashMap::new()),
                listener_ids: ListenerIds::default(),
                names: RefCell::new(HashSet::new()),
                path_versions: RefCell::new(HashMap::new()),
                anon_counter: Cell::new(0),
                flushing: Cell::new(false),
            }),
        }
    }

    /// Start defining a store.
    pub fn builder() -> super::builder::StoreBuilder {
        super::builder::StoreBuilder::new()
    }

    pub(crate) fn downgrade(&self) -> WeakStore {
        WeakStore(Rc::downgrade(&self.inner))
    }

    /// The store's configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// The dependency tracker shared by everything on this store.
    pub fn tracker(&self) -> &Tracker {
        &self.inner.tracker
    }

    /// Whether two handles point at the same store.
    pub fn ptr_eq(&self, other: &Store) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Current value of `key`, pending writes included.
    pub fn get_key(&self, key: &str) -> Option<Value> {
        if let Some(batch) = self.inner.pending.borrow().as_ref() {
            if let Some(value) = batch.get(key) {
                return Some(value.clone());
            }
        }
        self.inner.state.borrow().get(key).cloned()
    }

    /// Snapshot of every key, pending writes included.
    ///
    /// The returned `Rc` is reused until the visible state changes, so
    /// `Rc::ptr_eq` on two snapshots tells whether anything happened.
    pub fn get_all(&self) -> Snapshot {
        if let Some(snapshot) = self.inner.snapshot.borrow().as_ref() {
            return Rc::clone(snapshot);
        }

        let mut all = self.inner.state.borrow().clone();
        if let Some(batch) = self.inner.pending.borrow().as_ref() {
            for (key, value) in batch {
                all.insert(key.clone(), value.clone());
            }
        }
        let snapshot = Rc::new(all);
        *self.inner.snapshot.borrow_mut() = Some(Rc::clone(&snapshot));
        snapshot
    }

    /// Whether a batch is waiting to be flushed.
    pub fn has_pending(&self) -> bool {
        self.inner.pending.borrow().is_some()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Write `value` under `key`. Listeners are notified on the next flush.
    pub fn set_key(&self, key: &str, value: Value) {
        let changed = self.get_key(key).as_ref() != Some(&value);

        let opened = {
            let mut pending = self.inner.pending.borrow_mut();
            let opened = pending.is_none();
            pending
                .get_or_insert_with(IndexMap::new)
                .insert(key.to_string(), value);
            opened
        };

        if changed {
            self.invalidate_snapshot();
        }
        tracing::trace!(key, changed, "set_key");

        if opened {
            self.schedule_flush();
        }
    }

    /// Write `value` straight into the committed state without notifying
    /// anyone. Used while setting a store up.
    pub fn set_key_initial_value(&self, key: &str, value: Value) {
        self.inner.state.borrow_mut().insert(key.to_string(), value);
        self.invalidate_snapshot();
    }

    /// Like [`set_key_initial_value`](Self::set_key_initial_value) but keeps
    /// the cached snapshot. Used for bookkeeping keys created on reads.
    pub(crate) fn seed_key(&self, key: &str, value: Value) {
        self.inner.state.borrow_mut().insert(key.to_string(), value);
    }

    fn invalidate_snapshot(&self) {
        self.inner.snapshot.borrow_mut().take();
    }

    fn schedule_flush(&self) {
        let weak = self.downgrade();
        self.inner.scheduler.schedule(Box::new(move || {
            if let Some(store) = weak.upgrade() {
                store.flush();
            }
        }));
    }

    // ------------------------------------------------------------------
    // Flush
    // ------------------------------------------------------------------

    /// Apply pending writes and notify affected listeners, once each.
    ///
    /// Keeps going until no batch is left, so writes made by listeners are
    /// delivered before this returns. Calling it from inside a listener is a
    /// no-op; the outer call picks the new batch up.
    pub fn flush(&self) {
        if self.inner.flushing.replace(true) {
            return;
        }
        let _guard = FlushingGuard(&self.inner.flushing);

        let mut passes = 0;
        loop {
            if passes == self.inner.config.max_flush_passes && self.has_pending() {
                tracing::warn!(
                    passes,
                    "flush pass limit reached; leaving remaining writes pending"
                );
                self.schedule_flush();
                return;
            }

            let Some(batch) = self.inner.pending.borrow_mut().take() else {
                return;
            };
            passes += 1;

            let changed = self.commit(batch);
            if changed.is_empty() {
                continue;
            }
            self.invalidate_snapshot();

            let listeners = self.collect_listeners(&changed);
            tracing::debug!(
                pass = passes,
                changed = ?changed,
                listeners = listeners.len(),
                "flushing batch"
            );

            for listener in listeners {
                self.invoke(&listener);
            }
        }
    }

    /// Write a batch into the committed state; returns the keys that changed.
    fn commit(&self, batch: IndexMap<String, Value>) -> Vec<String> {
        let mut state = self.inner.state.borrow_mut();
        let mut changed = Vec::new();
        for (key, value) in batch {
            if state.get(&key) != Some(&value) {
                changed.push(key.clone());
            }
            state.insert(key, value);
        }
        changed
    }

    /// Listeners of all `keys`, deduplicated and in registration order.
    fn collect_listeners(&self, keys: &[String]) -> Vec<Listener> {
        let registry = self.inner.listeners.borrow();
        let mut affected = BTreeMap::new();
        for key in keys {
            if let Some(entries) = registry.get(key) {
                for (id, listener) in entries {
                    affected.entry(*id).or_insert_with(|| listener.clone());
                }
            }
        }
        affected.into_values().collect()
    }

    fn invoke(&self, listener: &Listener) {
        if !self.inner.config.isolate_listener_panics {
            listener.notify();
            return;
        }

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener.notify())) {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(listener = listener.id().raw(), %message, "listener panicked during flush");
        }
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Wrap a callback as a listener of this store.
    ///
    /// The same listener can be subscribed several times; it still runs
    /// once per flush.
    pub fn listener<F>(&self, notify: F) -> Listener
    where
        F: Fn() + 'static,
    {
        Listener::new(self.inner.listener_ids.next(), Rc::new(notify))
    }

    /// Subscribe a new listener to `keys`.
    pub fn sub_keys<S, F>(&self, keys: &[S], notify: F) -> Unsubscribe
    where
        S: AsRef<str>,
        F: Fn() + 'static,
    {
        let listener = self.listener(notify);
        self.sub_listener(keys, &listener)
    }

    /// Subscribe an existing listener to `keys`.
    pub fn sub_listener<S: AsRef<str>>(&self, keys: &[S], listener: &Listener) -> Unsubscribe {
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
        {
            let mut registry = self.inner.listeners.borrow_mut();
            for key in &keys {
                registry
                    .entry(key.clone())
                    .or_default()
                    .insert(listener.id(), listener.clone());
            }
        }
        tracing::trace!(listener = listener.id().raw(), keys = ?keys, "subscribed");

        Unsubscribe {
            store: self.downgrade(),
            id: listener.id(),
            keys,
        }
    }

    /// Number of listeners subscribed to `key`.
    pub fn listener_count(&self, key: &str) -> usize {
        self.inner
            .listeners
            .borrow()
            .get(key)
            .map_or(0, IndexMap::len)
    }

    // ------------------------------------------------------------------
    // Naming
    // ------------------------------------------------------------------

    /// Next name for an unnamed member (`anon0`, `anon1`, ...).
    pub fn anon_name(&self) -> String {
        let n = self.inner.anon_counter.get();
        self.inner.anon_counter.set(n + 1);
        format!("{}{}", self.inner.config.anon_prefix, n)
    }

    /// Reserve `name` for a member of this store.
    pub(crate) fn claim_name(&self, name: &str) -> Result<()> {
        if !self.inner.names.borrow_mut().insert(name.to_string()) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    /// Whether a member already uses `name`.
    pub fn has_name(&self, name: &str) -> bool {
        self.inner.names.borrow().contains(name)
    }

    // ------------------------------------------------------------------
    // Path versions
    // ------------------------------------------------------------------

    /// Version atom of `path` inside the atom keyed `owner`, if registered.
    pub(crate) fn path_version(&self, owner: &str, path: &str) -> Option<Atom> {
        self.inner
            .path_versions
            .borrow()
            .get(owner)
            .and_then(|versions| versions.get(path))
            .cloned()
    }

    pub(crate) fn insert_path_version(&self, owner: &str, path: &str, version: Atom) {
        self.inner
            .path_versions
            .borrow_mut()
            .entry(owner.to_string())
            .or_default()
            .insert(path.to_string(), version);
    }

    /// Every registered path of `owner` with its version atom, sorted by path.
    pub(crate) fn path_versions(&self, owner: &str) -> Vec<(String, Atom)> {
        self.inner
            .path_versions
            .borrow()
            .get(owner)
            .map(|versions| {
                versions
                    .iter()
                    .map(|(path, version)| (path.clone(), version.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("keys", &self.inner.state.borrow().len())
            .field("pending", &self.has_pending())
            .field("tracker_depth", &self.inner.tracker.depth())
            .finish()
    }
}
