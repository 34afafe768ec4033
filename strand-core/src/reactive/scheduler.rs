//! Flush Scheduling
//!
//! When the first write of a batch lands, the store asks its scheduler to run
//! a flush "after the current synchronous turn". The store does not care how
//! that happens, only that the task does not run before `set_key` returns.
//!
//! Three schedulers ship with the crate:
//!
//! - [`ManualFlush`]: never runs anything. Callers flush explicitly. This is
//!   the default and what tests use for determinism.
//! - [`QueuedFlush`]: keeps tasks in a local queue drained by
//!   [`QueuedFlush::run_pending`], for hosts with their own event loop.
//! - [`LocalTaskFlush`]: spawns the flush on the current tokio `LocalSet`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// A deferred flush. Holds only a weak handle to its store.
pub type FlushTask = Box<dyn FnOnce()>;

/// Queues a flush to run after the current synchronous turn.
pub trait FlushScheduler {
    /// Arrange for `task` to run later.
    fn schedule(&self, task: FlushTask);
}

/// Drops scheduled tasks; flushing is left to explicit `Store::flush` calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualFlush;

impl FlushScheduler for ManualFlush {
    fn schedule(&self, _task: FlushTask) {}
}

/// Collects tasks in a FIFO queue owned by the host.
///
/// Clones share the same queue, so one clone can be handed to the store and
/// another kept by the event loop.
#[derive(Clone, Default)]
pub struct QueuedFlush {
    queue: Rc<RefCell<VecDeque<FlushTask>>>,
}

impl QueuedFlush {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Run queued tasks until the queue is empty, including tasks queued by
    /// the tasks themselves. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Release the borrow before running: tasks may schedule more work.
            let task = self.queue.borrow_mut().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl FlushScheduler for QueuedFlush {
    fn schedule(&self, task: FlushTask) {
        self.queue.borrow_mut().push_back(task);
    }
}

impl fmt::Debug for QueuedFlush {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedFlush")
            .field("pending", &self.len())
            .finish()
    }
}

/// Spawns each flush as a task on the current tokio `LocalSet`.
///
/// The task runs once the spawning task yields, which gives the
/// "after the current synchronous block" ordering. Writing to a store using
/// this scheduler outside a `LocalSet` context panics inside tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTaskFlush;

impl FlushScheduler for LocalTaskFlush {
    fn schedule(&self, task: FlushTask) {
        tokio::task::spawn_local(async move { task() });
    }
}
