//! Store Definition and Groups
//!
//! A store is defined once, up front: atoms, selects and derived values are
//! registered under keys, optionally nested in groups, and `build` hands
//! every member its final name.
//!
//! Groups only prefix keys (`settings.theme`); they add no reactive
//! behavior. Key derivation depends on nothing but registration order and
//! the configured separator, so names are stable across runs, which
//! persistence layers rely on.
//!
//! Members are set up in three phases: atoms, then selects, then derived
//! values in registration order. A derived value may depend on any atom and
//! on derived values registered before it.
//!
//! Names are resolved and checked for duplicates before anything is bound.
//! If setting a member up still fails, every member bound by that build is
//! released again, so the same members can go into a later build.

use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use super::atom::Atom;
use super::derived::Derived;
use super::scheduler::{FlushScheduler, ManualFlush};
use super::select::Select;
use super::store::Store;
use crate::config::StoreConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Atom,
    Select,
    Derived,
}

/// Anything a store can name and set up.
trait Member {
    fn phase(&self) -> Phase;
    fn explicit_name(&self) -> Option<String> {
        None
    }
    fn is_initialized(&self) -> bool;
    fn bind_to(&self, store: &Store, name: String) -> Result<()>;
    fn unbind(&self);
}

impl Member for Atom {
    fn phase(&self) -> Phase {
        Phase::Atom
    }

    fn explicit_name(&self) -> Option<String> {
        Atom::explicit_name(self).map(str::to_string)
    }

    fn is_initialized(&self) -> bool {
        Atom::is_initialized(self)
    }

    fn bind_to(&self, store: &Store, name: String) -> Result<()> {
        self.bind(store, name)
    }

    fn unbind(&self) {
        Atom::unbind(self)
    }
}

impl<A: 'static> Member for Select<A> {
    fn phase(&self) -> Phase {
        Phase::Select
    }

    fn is_initialized(&self) -> bool {
        Select::is_initialized(self)
    }

    fn bind_to(&self, store: &Store, name: String) -> Result<()> {
        self.bind(store, name)
    }

    fn unbind(&self) {
        Select::unbind(self)
    }
}

impl Member for Derived {
    fn phase(&self) -> Phase {
        Phase::Derived
    }

    fn is_initialized(&self) -> bool {
        Derived::is_initialized(self)
    }

    fn bind_to(&self, store: &Store, name: String) -> Result<()> {
        self.bind(store, name)
    }

    fn unbind(&self) {
        Derived::unbind(self)
    }
}

enum Entry {
    /// A member under `key`, or under an anonymous name when `None`.
    Member {
        key: Option<String>,
        member: Rc<dyn Member>,
    },
    Group {
        name: String,
        members: GroupBuilder,
    },
}

/// Members collected for one level of the key hierarchy.
#[derive(Default)]
pub struct GroupBuilder {
    entries: Vec<Entry>,
}

impl GroupBuilder {
    /// Create an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, key: Option<String>, member: Rc<dyn Member>) -> Self {
        self.entries.push(Entry::Member { key, member });
        self
    }

    /// Register an atom under `key`. An atom created with
    /// [`Atom::named`] keeps its own name instead.
    pub fn atom(self, key: impl Into<String>, atom: &Atom) -> Self {
        self.push(Some(key.into()), Rc::new(atom.clone()))
    }

    /// Register an atom under the next anonymous name.
    pub fn anonymous(self, atom: &Atom) -> Self {
        self.push(None, Rc::new(atom.clone()))
    }

    /// Register a select under `key`.
    pub fn select<A: 'static>(self, key: impl Into<String>, select: &Select<A>) -> Self {
        self.push(Some(key.into()), Rc::new(select.clone()))
    }

    /// Register a derived value under `key`.
    pub fn derived(self, key: impl Into<String>, derived: &Derived) -> Self {
        self.push(Some(key.into()), Rc::new(derived.clone()))
    }

    /// Nest a group whose keys are prefixed with `name`.
    pub fn group<F>(mut self, name: impl Into<String>, define: F) -> Self
    where
        F: FnOnce(GroupBuilder) -> GroupBuilder,
    {
        self.entries.push(Entry::Group {
            name: name.into(),
            members: define(GroupBuilder::new()),
        });
        self
    }

    /// Number of members, nested groups included.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| match entry {
                Entry::Member { .. } => 1,
                Entry::Group { members, .. } => members.len(),
            })
            .sum()
    }

    /// Whether no member has been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into `(prefix, key, member)` in registration order.
    fn flatten(
        self,
        prefix: Option<&str>,
        separator: &str,
        out: &mut Vec<(Option<String>, Option<String>, Rc<dyn Member>)>,
    ) {
        for entry in self.entries {
            match entry {
                Entry::Member { key, member } => {
                    let key = member.explicit_name().or(key);
                    out.push((prefix.map(str::to_string), key, member));
                }
                Entry::Group { name, members } => {
                    let nested = join(prefix, &name, separator);
                    members.flatten(Some(&nested), separator, out);
                }
            }
        }
    }
}

impl fmt::Debug for GroupBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupBuilder")
            .field("members", &self.len())
            .finish()
    }
}

fn join(prefix: Option<&str>, name: &str, separator: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}{separator}{name}"),
        None => name.to_string(),
    }
}

/// Defines a store: configuration, scheduler and members.
pub struct StoreBuilder {
    config: StoreConfig,
    scheduler: Box<dyn FlushScheduler>,
    members: GroupBuilder,
}

impl StoreBuilder {
    /// Start with default configuration and manual flushing.
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
            scheduler: Box::new(ManualFlush),
            members: GroupBuilder::new(),
        }
    }

    /// Use `config` for the store.
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `scheduler` for automatic flushes.
    pub fn scheduler(mut self, scheduler: impl FlushScheduler + 'static) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }

    fn members(mut self, f: impl FnOnce(GroupBuilder) -> GroupBuilder) -> Self {
        self.members = f(self.members);
        self
    }

    /// Register an atom under `key`.
    pub fn atom(self, key: impl Into<String>, atom: &Atom) -> Self {
        self.members(|g| g.atom(key, atom))
    }

    /// Register an atom under the next anonymous name.
    pub fn anonymous(self, atom: &Atom) -> Self {
        self.members(|g| g.anonymous(atom))
    }

    /// Register a select under `key`.
    pub fn select<A: 'static>(self, key: impl Into<String>, select: &Select<A>) -> Self {
        self.members(|g| g.select(key, select))
    }

    /// Register a derived value under `key`.
    pub fn derived(self, key: impl Into<String>, derived: &Derived) -> Self {
        self.members(|g| g.derived(key, derived))
    }

    /// Nest a group whose keys are prefixed with `name`.
    pub fn group<F>(self, name: impl Into<String>, define: F) -> Self
    where
        F: FnOnce(GroupBuilder) -> GroupBuilder,
    {
        self.members(|g| g.group(name, define))
    }

    /// Create the store and set every member up.
    ///
    /// Fails on duplicate keys, on members already set up by another store
    /// and on derived values whose dependencies are not set up yet. On
    /// failure no member is left bound.
    pub fn build(self) -> Result<Store> {
        let store = Store::from_boxed(self.config, self.scheduler);
        let separator = store.config().group_separator.clone();

        let mut flat = Vec::new();
        self.members.flatten(None, &separator, &mut flat);
        // Stable: registration order is kept within each phase.
        flat.sort_by_key(|(_, _, member)| member.phase());

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(flat.len());
        for (prefix, key, member) in flat {
            let key = match key {
                Some(key) => key,
                None => store.anon_name(),
            };
            let name = join(prefix.as_deref(), &key, &separator);
            if member.is_initialized() || !seen.insert(name.clone()) {
                return Err(Error::DuplicateName(name));
            }
            resolved.push((name, member));
        }

        for (bound, (name, member)) in resolved.iter().enumerate() {
            if let Err(err) = member.bind_to(&store, name.clone()) {
                tracing::debug!(member = %name, error = %err, "store build failed; releasing members");
                for (_, member) in &resolved[..bound] {
                    member.unbind();
                }
                return Err(err);
            }
        }

        tracing::debug!(members = resolved.len(), "store built");
        Ok(store)
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StoreBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("config", &self.config)
            .field("members", &self.members)
            .finish()
    }
}
