//! Listener types for the store.
//!
//! A listener is any callback subscribed to one or more store keys. This
//! includes external observers, derived values, and subscribed selects.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Identity of a listener within one store.
///
/// Ids are handed out in increasing order, so sorting by id yields
/// registration order. Deduplication during flush is done by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Get the raw id value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Per-store generator for listener ids.
#[derive(Debug, Default)]
pub(crate) struct ListenerIds {
    next: Cell<u64>,
}

impl ListenerIds {
    pub(crate) fn next(&self) -> ListenerId {
        let id = self.next.get();
        self.next.set(id + 1);
        ListenerId(id)
    }
}

/// A callback invoked when one of its keys changed during a flush.
#[derive(Clone)]
pub struct Listener {
    id: ListenerId,
    notify: Rc<dyn Fn()>,
}

impl Listener {
    pub(crate) fn new(id: ListenerId, notify: Rc<dyn Fn()>) -> Self {
        Self { id, notify }
    }

    /// Get the listener's id.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Invoke the callback.
    pub fn notify(&self) {
        (self.notify)();
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").field("id", &self.id).finish()
    }
}
