//! Atom Implementation
//!
//! An atom is a named leaf cell backed by one store key. It is the only
//! state that is set directly; selects and derived values are computed from
//! atoms.
//!
//! # How Atoms Work
//!
//! 1. An atom is created detached, holding just its initial value.
//!
//! 2. When a store is built, it assigns the atom a name (the key it was
//!    registered under, or an anonymous one) and writes the initial value.
//!
//! 3. `get` records the key with the store's tracker, then reads the store.
//!    `set` hands the value to the store's pending batch.
//!
//! Using an atom before step 2 fails with [`Error::Uninitialized`].
//!
//! # Middleware
//!
//! Middleware transforms values on their way in and out of the store
//! (persistence hydration, clamping, normalization). Hooks only see values:
//! dependency recording and batching stay with the atom, so composed atoms
//! keep the exact get/set contract.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::store::{Binding, Store, Unsubscribe};
use crate::error::{Error, Result};

/// Value hooks wrapped around an atom's store access.
///
/// Every hook defaults to passing the value through. Middleware added later
/// wraps middleware added earlier: on `set` the outermost hook runs first,
/// on `get` and `init` it runs last.
pub trait AtomMiddleware {
    /// Transform the initial value before it is written at store setup.
    fn on_init(&self, _key: &str, value: Value) -> Value {
        value
    }

    /// Transform a value read from the store.
    fn on_get(&self, _key: &str, value: Value) -> Value {
        value
    }

    /// Transform a value before it is written to the store.
    fn on_set(&self, _key: &str, value: Value) -> Value {
        value
    }
}

struct AtomInner {
    explicit_name: Option<String>,
    initial: Value,
    middleware: RefCell<Vec<Rc<dyn AtomMiddleware>>>,
    binding: RefCell<Option<Binding>>,
}

/// A named, independently settable reactive value.
///
/// Clones refer to the same atom.
#[derive(Clone)]
pub struct Atom {
    inner: Rc<AtomInner>,
}

/// Create an unnamed atom. Its name comes from the store it is added to.
pub fn atom(initial: impl Into<Value>) -> Atom {
    Atom::new(initial)
}

impl Atom {
    /// Create an unnamed atom.
    pub fn new(initial: impl Into<Value>) -> Self {
        Self::build(None, initial.into())
    }

    /// Create an atom carrying its own name. The name wins over the key it
    /// is registered under; group prefixes still apply.
    pub fn named(name: impl Into<String>, initial: impl Into<Value>) -> Self {
        Self::build(Some(name.into()), initial.into())
    }

    fn build(explicit_name: Option<String>, initial: Value) -> Self {
        Self {
            inner: Rc::new(AtomInner {
                explicit_name,
                initial,
                middleware: RefCell::new(Vec::new()),
                binding: RefCell::new(None),
            }),
        }
    }

    /// Wrap the atom in `middleware`.
    pub fn with_middleware(self, middleware: impl AtomMiddleware + 'static) -> Self {
        self.inner
            .middleware
            .borrow_mut()
            .push(Rc::new(middleware));
        self
    }

    /// The name chosen at creation, if any.
    pub fn explicit_name(&self) -> Option<&str> {
        self.inner.explicit_name.as_deref()
    }

    /// The initial value given at creation.
    pub fn initial_value(&self) -> &Value {
        &self.inner.initial
    }

    /// The key assigned by the store, once set up.
    pub fn name(&self) -> Option<String> {
        self.inner
            .binding
            .borrow()
            .as_ref()
            .map(|binding| binding.name.clone())
    }

    /// Whether a store has set this atom up.
    pub fn is_initialized(&self) -> bool {
        self.inner.binding.borrow().is_some()
    }

    /// Whether two handles refer to the same atom.
    pub fn ptr_eq(&self, other: &Atom) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Assign `name` on `store` and write the initial value.
    pub(crate) fn bind(&self, store: &Store, name: String) -> Result<()> {
        self.attach(store, name, Store::set_key_initial_value)
    }

    /// Like `bind`, but the initial value does not invalidate the store's
    /// cached snapshot.
    pub(crate) fn bind_seeded(&self, store: &Store, name: String) -> Result<()> {
        self.attach(store, name, Store::seed_key)
    }

    fn attach(&self, store: &Store, name: String, write: fn(&Store, &str, Value)) -> Result<()> {
        if self.is_initialized() {
            return Err(Error::DuplicateName(name));
        }
        store.claim_name(&name)?;

        let initial = self
            .middleware()
            .iter()
            .fold(self.inner.initial.clone(), |value, mw| mw.on_init(&name, value));
        write(store, &name, initial);

        *self.inner.binding.borrow_mut() = Some(Binding {
            name,
            store: store.downgrade(),
        });
        Ok(())
    }

    /// Drop the store binding so the atom can be set up again.
    pub(crate) fn unbind(&self) {
        self.inner.binding.borrow_mut().take();
    }

    fn middleware(&self) -> Vec<Rc<dyn AtomMiddleware>> {
        self.inner.middleware.borrow().clone()
    }

    fn resolve(&self, operation: &'static str) -> Result<(String, Store)> {
        Binding::resolve(&self.inner.binding, operation)
    }

    fn read(&self, name: &str, store: &Store) -> Value {
        let raw = store.get_key(name).unwrap_or(Value::Null);
        self.middleware()
            .iter()
            .fold(raw, |value, mw| mw.on_get(name, value))
    }

    /// The store this atom lives in.
    pub fn store(&self) -> Result<Store> {
        self.resolve("store").map(|(_, store)| store)
    }

    /// Read the value, recording the key with any active tracking session.
    pub fn get(&self) -> Result<Value> {
        let (name, store) = self.resolve("get")?;
        store.tracker().record(&name);
        Ok(self.read(&name, &store))
    }

    /// Read the value without recording a dependency.
    pub fn get_untracked(&self) -> Result<Value> {
        let (name, store) = self.resolve("get")?;
        Ok(self.read(&name, &store))
    }

    /// Read and deserialize the value.
    pub fn get_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.get()?)?)
    }

    /// Write a new value. Listeners run on the next flush.
    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        let (name, store) = self.resolve("set")?;
        let value = self
            .middleware()
            .iter()
            .rev()
            .fold(value.into(), |value, mw| mw.on_set(&name, value));
        store.set_key(&name, value);
        Ok(())
    }

    /// Serialize and write a value.
    pub fn set_as<T: Serialize>(&self, value: &T) -> Result<()> {
        self.set(serde_json::to_value(value)?)
    }

    /// Write a value computed from the current one. Does not record a
    /// dependency.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Value) -> Value,
    {
        let current = self.get_untracked()?;
        self.set(f(&current))
    }

    /// Call `listener` after every flush that changed this atom.
    pub fn sub<F>(&self, listener: F) -> Result<Unsubscribe>
    where
        F: Fn() + 'static,
    {
        let (name, store) = self.resolve("sub")?;
        Ok(store.sub_keys(&[name], listener))
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("name", &self.name())
            .field("initial", &self.inner.initial)
            .field("middleware", &self.inner.middleware.borrow().len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
