//! Derived Implementation
//!
//! A derived value is the eager counterpart of a select: it keeps its result
//! in the store under its own key and recomputes whenever one of an explicit
//! list of dependencies changes.
//!
//! # How Derived Values Work
//!
//! 1. At store setup the dependency keys are resolved, the value is computed
//!    once and written with `set_key_initial_value`.
//!
//! 2. The derived value subscribes to its dependency keys. When a flush
//!    changes any of them it recomputes and writes the result with
//!    `set_key`, so its own listeners run in the next pass of that same
//!    flush.
//!
//! 3. Reads are tracked like atom reads and never recompute.
//!
//! A failed recomputation keeps the previous value and is logged.
//!
//! # Differences from Select
//!
//! - Selects recompute on every read; derived values on dependency change.
//! - Selects discover their dependencies; derived values are told them.
//! - Derived values occupy a store key; selects do not.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;

use super::atom::Atom;
use super::store::{Binding, Store, Unsubscribe};
use crate::error::{Error, Result};

/// The computation behind a derived value. Receives dependency values in
/// declaration order.
pub type ComputeFn = Rc<dyn Fn(&[Value]) -> Result<Value>>;

/// One entry of a derived value's dependency list.
#[derive(Clone)]
pub enum Dep {
    /// An atom, resolved to its key at setup.
    Atom(Atom),
    /// Another derived value. It must be set up first.
    Derived(Derived),
    /// A raw store key.
    Key(String),
}

impl Dep {
    fn key(&self) -> Result<String> {
        let name = match self {
            Dep::Atom(atom) => atom.name(),
            Dep::Derived(derived) => derived.name(),
            Dep::Key(key) => Some(key.clone()),
        };
        name.ok_or(Error::Uninitialized {
            operation: "derived dependency",
        })
    }
}

impl From<&Atom> for Dep {
    fn from(atom: &Atom) -> Self {
        Dep::Atom(atom.clone())
    }
}

impl From<&Derived> for Dep {
    fn from(derived: &Derived) -> Self {
        Dep::Derived(derived.clone())
    }
}

impl From<&str> for Dep {
    fn from(key: &str) -> Self {
        Dep::Key(key.to_string())
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dep::Atom(atom) => f.debug_tuple("Atom").field(&atom.name()).finish(),
            Dep::Derived(derived) => f.debug_tuple("Derived").field(&derived.name()).finish(),
            Dep::Key(key) => f.debug_tuple("Key").field(key).finish(),
        }
    }
}

struct DerivedInner {
    deps: Vec<Dep>,
    compute: ComputeFn,
    binding: RefCell<Option<Binding>>,
    keys: RefCell<Vec<String>>,
    subscription: RefCell<Option<Unsubscribe>>,
}

/// A cached value recomputed from a fixed dependency list.
#[derive(Clone)]
pub struct Derived {
    inner: Rc<DerivedInner>,
}

/// Create a derived value over `deps`.
pub fn derived<I, F>(deps: I, compute: F) -> Derived
where
    I: IntoIterator,
    I::Item: Into<Dep>,
    F: Fn(&[Value]) -> Result<Value> + 'static,
{
    Derived {
        inner: Rc::new(DerivedInner {
            deps: deps.into_iter().map(Into::into).collect(),
            compute: Rc::new(compute),
            binding: RefCell::new(None),
            keys: RefCell::new(Vec::new()),
            subscription: RefCell::new(None),
        }),
    }
}

impl Derived {
    /// The key assigned by the store, once set up.
    pub fn name(&self) -> Option<String> {
        self.inner
            .binding
            .borrow()
            .as_ref()
            .map(|binding| binding.name.clone())
    }

    /// Whether a store has set this value up.
    pub fn is_initialized(&self) -> bool {
        self.inner.binding.borrow().is_some()
    }

    /// Resolved dependency keys. Empty before setup.
    pub fn dep_keys(&self) -> Vec<String> {
        self.inner.keys.borrow().clone()
    }

    pub(crate) fn bind(&self, store: &Store, name: String) -> Result<()> {
        if self.is_initialized() {
            return Err(Error::DuplicateName(name));
        }
        let keys = self
            .inner
            .deps
            .iter()
            .map(Dep::key)
            .collect::<Result<Vec<_>>>()?;
        store.claim_name(&name)?;

        let initial = self.compute(store, &keys)?;
        store.set_key_initial_value(&name, initial);

        let weak: Weak<DerivedInner> = Rc::downgrade(&self.inner);
        let subscription = store.sub_keys(&keys, move || {
            if let Some(inner) = weak.upgrade() {
                Derived { inner }.recompute();
            }
        });

        *self.inner.keys.borrow_mut() = keys;
        *self.inner.subscription.borrow_mut() = Some(subscription);
        *self.inner.binding.borrow_mut() = Some(Binding {
            name,
            store: store.downgrade(),
        });
        Ok(())
    }

    /// Undo `bind`: stop following dependencies and drop the binding.
    pub(crate) fn unbind(&self) {
        self.dispose();
        self.inner.keys.borrow_mut().clear();
        self.inner.binding.borrow_mut().take();
    }

    fn compute(&self, store: &Store, keys: &[String]) -> Result<Value> {
        let values: Vec<Value> = keys
            .iter()
            .map(|key| store.get_key(key).unwrap_or(Value::Null))
            .collect();
        (self.inner.compute)(&values)
    }

    fn recompute(&self) {
        let Ok((name, store)) = Binding::resolve(&self.inner.binding, "recompute") else {
            return;
        };
        let keys = self.dep_keys();
        match self.compute(&store, &keys) {
            Ok(value) => store.set_key(&name, value),
            Err(err) => {
                tracing::warn!(derived = %name, error = %err, "derived recomputation failed; keeping previous value");
            }
        }
    }

    /// Read the cached value, recording the key with any tracking session.
    pub fn get(&self) -> Result<Value> {
        let (name, store) = Binding::resolve(&self.inner.binding, "get")?;
        store.tracker().record(&name);
        Ok(store.get_key(&name).unwrap_or(Value::Null))
    }

    /// Read the cached value without recording a dependency.
    pub fn get_untracked(&self) -> Result<Value> {
        let (name, store) = Binding::resolve(&self.inner.binding, "get")?;
        Ok(store.get_key(&name).unwrap_or(Value::Null))
    }

    /// Call `listener` after flushes that changed the cached value.
    pub fn sub<F>(&self, listener: F) -> Result<Unsubscribe>
    where
        F: Fn() + 'static,
    {
        let (name, store) = Binding::resolve(&self.inner.binding, "sub")?;
        Ok(store.sub_keys(&[name], listener))
    }

    /// Stop following dependencies. The cached value stays as it is.
    pub fn dispose(&self) {
        if let Some(subscription) = self.inner.subscription.borrow_mut().take() {
            subscription.unsubscribe();
        }
    }

    /// Whether the value still follows its dependencies.
    pub fn is_disposed(&self) -> bool {
        self.is_initialized() && self.inner.subscription.borrow().is_none()
    }
}

impl fmt::Debug for Derived {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("name", &self.name())
            .field("deps", &self.inner.deps)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
