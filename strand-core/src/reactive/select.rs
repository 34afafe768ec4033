//! Select Implementation
//!
//! A select is a parameterized derived computation. Unlike a memo it never
//! caches its value: every `get` re-runs the selector. What is memoized is
//! the *dependency list*, the store keys the selector reads, which is what
//! subscriptions are built from.
//!
//! # How Selects Work
//!
//! 1. The first successful evaluation that is not nested inside another
//!    tracking session runs under the store's tracker. The keys it read
//!    become the select's fixed dependency list, for every argument.
//!
//! 2. A nested evaluation (a select read by another select's first run) is
//!    a plain call. Its atom reads are recorded by the outer session, which
//!    is how dependencies propagate transitively.
//!
//! 3. A failed evaluation leaves the list unset, so a later call can still
//!    capture it.
//!
//! 4. Dynamic selects skip capture entirely. Each `sub` evaluates the
//!    selector for its argument and subscribes to whatever that run read.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use super::store::{Binding, Store, Unsubscribe};
use crate::error::{Error, Result};

/// The computation behind a select.
pub type SelectorFn<A> = Rc<dyn Fn(&A) -> Result<Value>>;

/// Optional write path of a select.
pub type SetterFn<A> = Rc<dyn Fn(&A, Value) -> Result<()>>;

/// Creation options for [`select_with`].
pub struct SelectOptions<A> {
    /// Recompute subscriptions on every `sub` instead of capturing them once.
    pub dynamic_deps: bool,
    /// Handler for `set`. Without one the select is read-only.
    pub set: Option<SetterFn<A>>,
}

impl<A> SelectOptions<A> {
    /// Static dependencies, read-only.
    pub fn new() -> Self {
        Self {
            dynamic_deps: false,
            set: None,
        }
    }

    /// Switch to dynamic dependencies.
    pub fn dynamic(mut self) -> Self {
        self.dynamic_deps = true;
        self
    }

    /// Make the select writable.
    pub fn setter<F>(mut self, set: F) -> Self
    where
        F: Fn(&A, Value) -> Result<()> + 'static,
    {
        self.set = Some(Rc::new(set));
        self
    }
}

impl<A> Default for SelectOptions<A> {
    fn default() -> Self {
        Self::new()
    }
}

struct SelectInner<A> {
    selector: SelectorFn<A>,
    setter: Option<SetterFn<A>>,
    dynamic_deps: bool,
    binding: RefCell<Option<Binding>>,
    deps: RefCell<Option<Vec<String>>>,
}

/// A derived computation over store values, parameterized by `A`.
///
/// Use `()` for selects that take no argument. Clones refer to the same
/// select and share its dependency list.
pub struct Select<A: 'static> {
    inner: Rc<SelectInner<A>>,
}

/// Create a read-only select with captured dependencies.
pub fn select<A, F>(selector: F) -> Select<A>
where
    A: 'static,
    F: Fn(&A) -> Result<Value> + 'static,
{
    select_with(selector, SelectOptions::new())
}

/// Create a select with explicit options.
pub fn select_with<A, F>(selector: F, options: SelectOptions<A>) -> Select<A>
where
    A: 'static,
    F: Fn(&A) -> Result<Value> + 'static,
{
    Select {
        inner: Rc::new(SelectInner {
            selector: Rc::new(selector),
            setter: options.set,
            dynamic_deps: options.dynamic_deps,
            binding: RefCell::new(None),
            deps: RefCell::new(None),
        }),
    }
}

impl<A: 'static> Select<A> {
    /// The key assigned by the store, once set up.
    pub fn name(&self) -> Option<String> {
        self.inner
            .binding
            .borrow()
            .as_ref()
            .map(|binding| binding.name.clone())
    }

    /// Whether a store has set this select up.
    pub fn is_initialized(&self) -> bool {
        self.inner.binding.borrow().is_some()
    }

    /// Whether subscriptions are recomputed on each `sub`.
    pub fn is_dynamic(&self) -> bool {
        self.inner.dynamic_deps
    }

    /// The captured dependency list, if any evaluation captured it yet.
    pub fn deps(&self) -> Option<Vec<String>> {
        self.inner.deps.borrow().clone()
    }

    pub(crate) fn bind(&self, store: &Store, name: String) -> Result<()> {
        if self.is_initialized() {
            return Err(Error::DuplicateName(name));
        }
        store.claim_name(&name)?;
        self.attach(store, name);
        Ok(())
    }

    /// Bind under `name` without reserving it in the store's namespace.
    /// Used for selects that never appear in a store definition.
    pub(crate) fn attach(&self, store: &Store, name: String) {
        *self.inner.binding.borrow_mut() = Some(Binding {
            name,
            store: store.downgrade(),
        });
    }

    /// Whether the select is bound to `store`.
    pub(crate) fn is_bound_to(&self, store: &Store) -> bool {
        self.inner
            .binding
            .borrow()
            .as_ref()
            .and_then(|binding| binding.store.upgrade())
            .is_some_and(|bound| bound.ptr_eq(store))
    }

    /// Drop the store binding and any captured dependencies.
    pub(crate) fn unbind(&self) {
        self.inner.binding.borrow_mut().take();
        self.inner.deps.borrow_mut().take();
    }

    fn resolve(&self, operation: &'static str) -> Result<(String, Store)> {
        Binding::resolve(&self.inner.binding, operation)
    }

    /// Fix the argument, giving a handle with the full read/write surface.
    pub fn call(&self, arg: A) -> CalledSelect<A> {
        CalledSelect {
            select: self.clone(),
            arg,
        }
    }

    /// Run the selector for `arg`.
    ///
    /// Captures the dependency list on the first successful top-level run.
    pub fn get(&self, arg: &A) -> Result<Value> {
        let (name, store) = self.resolve("get")?;
        let tracker = store.tracker();

        let capture = !self.inner.dynamic_deps
            && self.inner.deps.borrow().is_none()
            && !tracker.is_recording();
        if !capture {
            return (self.inner.selector)(arg);
        }

        let tracked = tracker.track(|| (self.inner.selector)(arg))?;
        self.capture_deps(&name, tracked.unique_deps());
        Ok(tracked.value)
    }

    /// Run the selector and project the result.
    pub fn get_with<R, F>(&self, arg: &A, custom: F) -> Result<R>
    where
        F: FnOnce(Value) -> R,
    {
        self.get(arg).map(custom)
    }

    /// Write through the select's setter.
    pub fn set(&self, arg: &A, value: impl Into<Value>) -> Result<()> {
        let (name, _store) = self.resolve("set")?;
        match &self.inner.setter {
            Some(setter) => setter(arg, value.into()),
            None => Err(Error::ReadOnly(name)),
        }
    }

    /// Call `listener` after every flush that changed a dependency of the
    /// selector for `arg`.
    pub fn sub<F>(&self, arg: &A, listener: F) -> Result<Unsubscribe>
    where
        F: Fn() + 'static,
    {
        let (_, store) = self.resolve("sub")?;
        let keys = self.subscription_keys(arg, &store)?;
        if keys.is_empty() {
            return Ok(Unsubscribe::noop());
        }
        Ok(store.sub_keys(&keys, listener))
    }

    /// Keys a subscription for `arg` listens to.
    fn subscription_keys(&self, arg: &A, store: &Store) -> Result<Vec<String>> {
        if !self.inner.dynamic_deps {
            if let Some(deps) = self.deps() {
                return Ok(deps);
            }
        }

        // An independent session, even when subscribing from inside a
        // tracked computation.
        let tracker = store.tracker();
        let tracked = tracker.no_track(|| tracker.track(|| (self.inner.selector)(arg)))?;
        let deps = tracked.unique_deps();

        if !self.inner.dynamic_deps {
            if let Some(name) = self.name() {
                self.capture_deps(&name, deps.clone());
            }
        }
        Ok(deps)
    }

    fn capture_deps(&self, name: &str, deps: Vec<String>) {
        let mut slot = self.inner.deps.borrow_mut();
        if slot.is_none() {
            tracing::trace!(select = name, deps = ?deps, "captured select dependencies");
            *slot = Some(deps);
        }
    }
}

impl<A: 'static> Clone for Select<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<A: 'static> fmt::Debug for Select<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Select")
            .field("name", &self.name())
            .field("dynamic_deps", &self.inner.dynamic_deps)
            .field("deps", &self.deps())
            .field("writable", &self.inner.setter.is_some())
            .finish()
    }
}

/// A select with its argument fixed.
pub struct CalledSelect<A: 'static> {
    select: Select<A>,
    arg: A,
}

impl<A: 'static> CalledSelect<A> {
    /// The argument this handle was called with.
    pub fn arg(&self) -> &A {
        &self.arg
    }

    /// The select this handle came from.
    pub fn select(&self) -> &Select<A> {
        &self.select
    }

    /// Run the selector.
    pub fn get(&self) -> Result<Value> {
        self.select.get(&self.arg)
    }

    /// Run the selector and project the result.
    pub fn get_with<R, F>(&self, custom: F) -> Result<R>
    where
        F: FnOnce(Value) -> R,
    {
        self.select.get_with(&self.arg, custom)
    }

    /// Write through the select's setter.
    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        self.select.set(&self.arg, value)
    }

    /// Subscribe to the selector's dependencies.
    pub fn sub<F>(&self, listener: F) -> Result<Unsubscribe>
    where
        F: Fn() + 'static,
    {
        self.select.sub(&self.arg, listener)
    }

    /// The select's captured dependency list.
    pub fn deps(&self) -> Option<Vec<String>> {
        self.select.deps()
    }
}

impl<A: Clone + 'static> Clone for CalledSelect<A> {
    fn clone(&self) -> Self {
        Self {
            select: self.select.clone(),
            arg: self.arg.clone(),
        }
    }
}

impl<A: fmt::Debug + 'static> fmt::Debug for CalledSelect<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalledSelect")
            .field("select", &self.select)
            .field("arg", &self.arg)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
