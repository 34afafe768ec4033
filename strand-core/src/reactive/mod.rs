//! Reactive Primitives
//!
//! This module implements the store and everything defined on it: atoms,
//! selects, derived values and path accessors. Together they form Strand's
//! fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Store
//!
//! A store holds state as string keys mapped to JSON values. Writes are
//! batched; one flush applies a whole batch and notifies each affected
//! listener once.
//!
//! ## Atoms
//!
//! An atom is a named leaf cell backed by one store key. Reading an atom
//! while a tracking session is open records the key as a dependency.
//!
//! ## Selects
//!
//! A select is a parameterized computation over atoms and other selects. It
//! discovers its dependency keys on the first successful evaluation and
//! subscribes to exactly those keys.
//!
//! ## Derived Values
//!
//! A derived value is cached under its own key and recomputed when one of an
//! explicit dependency list changes.
//!
//! ## Path Accessors
//!
//! A path accessor reads and writes nested locations inside one atom's
//! value. Subscribers of a path are notified only when a write could have
//! touched it.
//!
//! # Implementation Notes
//!
//! Each store owns one dependency tracker. Reads call into it, and it
//! records keys only while a tracking session is the innermost frame.
//! Everything is single-threaded and shared through `Rc`.

mod atom;
mod builder;
mod derived;
mod listener;
mod path;
mod scheduler;
mod select;
mod store;
mod tracker;

pub use atom::{atom, Atom, AtomMiddleware};
pub use builder::{GroupBuilder, StoreBuilder};
pub use derived::{derived, ComputeFn, Dep, Derived};
pub use listener::{Listener, ListenerId};
pub use path::{CalledPath, PathAccessor};
pub use scheduler::{FlushScheduler, FlushTask, LocalTaskFlush, ManualFlush, QueuedFlush};
pub use select::{select, select_with, CalledSelect, Select, SelectOptions, SelectorFn, SetterFn};
pub use store::{Snapshot, Store, Unsubscribe};
pub use tracker::{unique_keys, Tracked, Tracker};
