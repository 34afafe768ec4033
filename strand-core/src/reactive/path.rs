//! Path Accessor
//!
//! Fine-grained reactivity over an object-valued atom. Reading
//! `profile.at("address.city")` subscribes to that sub-path only, not to the
//! whole profile.
//!
//! # How It Works
//!
//! Each path that has ever been accessed gets a version atom keyed
//! `<owner>/<path>`. It holds an integer, never the sub-value. Version atoms
//! are registered with the store per owner, so every accessor over the same
//! atom shares them.
//!
//! - Reading a path reads its version atom (the tracked dependency) and the
//!   owner under `no_track`, then walks the owner value.
//! - Writing a path clones the owner value, writes into it, sets the owner,
//!   and bumps the version of every registered path that is an ancestor or
//!   a descendant of the written one. Siblings are left alone.
//!
//! Cost is proportional to the number of distinct paths observed, not to
//! the size of the object.
//!
//! Writes to the owner that bypass the accessor do not bump any version;
//! use [`PathAccessor::replace`] to swap the whole value.

use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};

use super::atom::Atom;
use super::select::{select_with, CalledSelect, Select, SelectOptions};
use super::store::{Store, Unsubscribe};
use crate::config::PathOptions;
use crate::error::{Error, Result};

struct PathInner {
    owner: Atom,
    options: PathOptions,
    select: Select<String>,
}

/// Per-path reactive view into an object-valued atom.
#[derive(Clone)]
pub struct PathAccessor {
    inner: Rc<PathInner>,
}

fn upgrade(weak: &Weak<PathInner>) -> Result<Rc<PathInner>> {
    weak.upgrade().ok_or(Error::Uninitialized {
        operation: "path accessor",
    })
}

impl PathAccessor {
    /// Create an accessor with strict traversal and `.` as separator.
    pub fn new(owner: &Atom) -> Self {
        Self::with_options(owner, PathOptions::default())
    }

    /// Create an accessor with explicit options.
    pub fn with_options(owner: &Atom, options: PathOptions) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<PathInner>| {
            let reader = weak.clone();
            let writer = weak.clone();
            let select = select_with(
                move |path: &String| upgrade(&reader)?.read(path),
                SelectOptions::new()
                    .dynamic()
                    .setter(move |path: &String, value| upgrade(&writer)?.write(path, value)),
            );

            PathInner {
                owner: owner.clone(),
                options,
                select,
            }
        });

        Self { inner }
    }

    /// The atom holding the whole object.
    pub fn owner(&self) -> &Atom {
        &self.inner.owner
    }

    /// A handle on one path.
    pub fn at(&self, path: impl Into<String>) -> CalledPath {
        CalledPath {
            accessor: self.clone(),
            path: path.into(),
        }
    }

    /// Read the value at `path`, tracking only that path.
    pub fn get(&self, path: &str) -> Result<Value> {
        self.inner.ensure_bound()?;
        self.inner.select.get(&path.to_string())
    }

    /// Write `value` at `path` and bump related path versions.
    pub fn set(&self, path: &str, value: impl Into<Value>) -> Result<()> {
        self.inner.ensure_bound()?;
        self.inner.select.set(&path.to_string(), value)
    }

    /// Replace the whole owner value, notifying every registered path.
    pub fn replace(&self, root: impl Into<Value>) -> Result<()> {
        self.set("", root)
    }

    /// Call `listener` after flushes that touched `path`, an ancestor, or a
    /// descendant of it.
    pub fn sub<F>(&self, path: &str, listener: F) -> Result<Unsubscribe>
    where
        F: Fn() + 'static,
    {
        self.inner.ensure_bound()?;
        self.inner.select.sub(&path.to_string(), listener)
    }

    /// Current version counter of `path`. Registers the path if needed.
    pub fn version(&self, path: &str) -> Result<i64> {
        let version = self.inner.version_atom(path)?;
        Ok(version.get_untracked()?.as_i64().unwrap_or(0))
    }

    /// Every path of the owner accessed so far through any accessor,
    /// sorted. Empty while the owner is not set up.
    pub fn registered_paths(&self) -> Vec<String> {
        let (Ok(store), Ok(owner)) = (self.inner.owner.store(), self.inner.owner_name()) else {
            return Vec::new();
        };
        store
            .path_versions(&owner)
            .into_iter()
            .map(|(path, _)| path)
            .collect()
    }

    /// The dynamic select backing this accessor.
    pub fn as_select(&self) -> Result<Select<String>> {
        self.inner.ensure_bound()?;
        Ok(self.inner.select.clone())
    }
}

impl fmt::Debug for PathAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathAccessor")
            .field("owner", &self.inner.owner.name())
            .field("options", &self.inner.options)
            .field("paths", &self.registered_paths())
            .finish()
    }
}

impl PathInner {
    /// Bind the backing select to the owner's store on first use. The
    /// select takes no name in the store's namespace.
    fn ensure_bound(&self) -> Result<()> {
        let store = self.owner.store()?;
        if !self.select.is_bound_to(&store) {
            self.select
                .attach(&store, format!("paths({})", self.owner_name()?));
        }
        Ok(())
    }

    fn owner_name(&self) -> Result<String> {
        self.owner.name().ok_or(Error::Uninitialized {
            operation: "path accessor",
        })
    }

    /// The version atom for `path`, created on first access by any
    /// accessor over the owner.
    fn version_atom(&self, path: &str) -> Result<Atom> {
        let store = self.owner.store()?;
        let owner = self.owner_name()?;
        if let Some(version) = store.path_version(&owner, path) {
            return Ok(version);
        }

        let key = format!("{owner}/{path}");
        let version = Atom::new(0);
        version.bind_seeded(&store, key.clone())?;
        store.insert_path_version(&owner, path, version.clone());
        tracing::debug!(key = %key, "registered path version");

        Ok(version)
    }

    fn registered(&self, store: &Store) -> Result<Vec<(String, Atom)>> {
        Ok(store.path_versions(&self.owner_name()?))
    }

    fn read(&self, path: &str) -> Result<Value> {
        let version = self.version_atom(path)?;
        version.get()?;

        let store = self.owner.store()?;
        let root = store.tracker().no_track(|| self.owner.get())?;
        traverse(&root, path, &self.options)
    }

    fn write(&self, path: &str, value: Value) -> Result<()> {
        let store = self.owner.store()?;
        let affected: Vec<Atom> = self
            .registered(&store)?
            .into_iter()
            .filter(|(registered, _)| related(registered, path, self.options.separator))
            .map(|(_, version)| version)
            .collect();

        let mut root = self.owner.get_untracked()?;
        assign(&mut root, path, value, &self.options)?;
        self.owner.set(root)?;

        for version in affected {
            let next = version.get_untracked()?.as_i64().unwrap_or(0) + 1;
            version.set(next)?;
        }
        Ok(())
    }
}

/// Split a path into fragments. The empty path is the root.
fn fragments(path: &str, separator: char) -> Vec<&str> {
    if path.is_empty() {
        Vec::new()
    } else {
        path.split(separator).collect()
    }
}

/// Whether one path is an ancestor of, equal to, or a descendant of the
/// other, compared fragment by fragment.
fn related(a: &str, b: &str, separator: char) -> bool {
    fragments(a, separator)
        .iter()
        .zip(fragments(b, separator).iter())
        .all(|(x, y)| x == y)
}

fn structure_error(path: &str, fragment: &str) -> Error {
    Error::PathStructure {
        path: path.to_string(),
        fragment: fragment.to_string(),
    }
}

/// Walk `root` along `path`. Null or missing values end the walk early.
fn traverse(root: &Value, path: &str, options: &PathOptions) -> Result<Value> {
    let mut current = root;
    for fragment in fragments(path, options.separator) {
        let next = match current {
            Value::Null => return Ok(Value::Null),
            Value::Object(map) => map.get(fragment),
            Value::Array(items) => fragment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index)),
            _ if options.strict => return Err(structure_error(path, fragment)),
            _ => return Ok(Value::Null),
        };
        match next {
            Some(value) => current = value,
            None => return Ok(Value::Null),
        }
    }
    Ok(current.clone())
}

/// Turn null (and, when not strict, any scalar) into an empty object so a
/// write can descend through it.
fn make_container(value: &mut Value, strict: bool) {
    let scalar = !value.is_object() && !value.is_array();
    if value.is_null() || (!strict && scalar) {
        *value = Value::Object(Map::new());
    }
}

fn child_mut<'a>(
    value: &'a mut Value,
    path: &str,
    fragment: &str,
    strict: bool,
) -> Result<&'a mut Value> {
    make_container(value, strict);
    match value {
        Value::Object(map) => Ok(map.entry(fragment.to_string()).or_insert(Value::Null)),
        Value::Array(items) => match fragment.parse::<usize>().ok() {
            Some(index) if index < items.len() => Ok(&mut items[index]),
            _ => Err(structure_error(path, fragment)),
        },
        _ => Err(structure_error(path, fragment)),
    }
}

/// Write `value` at `path` inside `root`, creating missing objects.
fn assign(root: &mut Value, path: &str, value: Value, options: &PathOptions) -> Result<()> {
    let parts = fragments(path, options.separator);
    let Some((last, parents)) = parts.split_last() else {
        *root = value;
        return Ok(());
    };

    let mut current = root;
    for fragment in parents {
        current = child_mut(current, path, fragment, options.strict)?;
    }

    make_container(current, options.strict);
    match current {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
        }
        Value::Array(items) => match last.parse::<usize>().ok() {
            Some(index) if index < items.len() => items[index] = value,
            Some(index) if index == items.len() => items.push(value),
            _ => return Err(structure_error(path, last)),
        },
        _ => return Err(structure_error(path, last)),
    }
    Ok(())
}

/// A path accessor with its path fixed.
#[derive(Clone)]
pub struct CalledPath {
    accessor: PathAccessor,
    path: String,
}

impl CalledPath {
    /// The path this handle points at.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read the value at the path.
    pub fn get(&self) -> Result<Value> {
        self.accessor.get(&self.path)
    }

    /// Write the value at the path.
    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        self.accessor.set(&self.path, value)
    }

    /// Subscribe to changes affecting the path.
    pub fn sub<F>(&self, listener: F) -> Result<Unsubscribe>
    where
        F: Fn() + 'static,
    {
        self.accessor.sub(&self.path, listener)
    }

    /// Current version counter of the path.
    pub fn version(&self) -> Result<i64> {
        self.accessor.version(&self.path)
    }

    /// The same handle as a called select.
    pub fn as_called_select(&self) -> Result<CalledSelect<String>> {
        Ok(self.accessor.as_select()?.call(self.path.clone()))
    }
}

impl fmt::Debug for CalledPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalledPath")
            .field("owner", &self.accessor.owner().name())
            .field("path", &self.path)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
