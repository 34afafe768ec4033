//! Dependency Tracker
//!
//! The tracker records which store keys a computation reads. Selects use it
//! on their first evaluation to capture the key list they subscribe to.
//!
//! # Implementation
//!
//! Each store owns one tracker holding a stack of frames. `track` pushes a
//! recording frame, `no_track` pushes a frame that hides reads from every
//! enclosing session. Reads only land in the top frame, and only when that
//! frame is recording.
//!
//! Frames are popped by guards, so an error or a panic inside the tracked
//! function never leaves the tracker active.

use std::cell::RefCell;

use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::error::{Error, Result};

type KeyList = SmallVec<[String; 8]>;

/// An entry in the tracking stack.
#[derive(Debug)]
enum Frame {
    /// A tracking session collecting the keys read so far.
    Tracking(KeyList),
    /// Reads are invisible to everything below this frame.
    NoTrack,
}

/// Result of a tracked evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracked<T> {
    /// What the tracked function returned.
    pub value: T,
    /// Keys read during the evaluation, in read order, duplicates included.
    pub deps: Vec<String>,
}

impl<T> Tracked<T> {
    /// The dependency list with duplicates removed, first read wins.
    pub fn unique_deps(&self) -> Vec<String> {
        unique_keys(&self.deps)
    }
}

/// Remove duplicate keys while keeping first-seen order.
pub fn unique_keys<S: AsRef<str>>(keys: &[S]) -> Vec<String> {
    keys.iter()
        .map(|k| k.as_ref().to_string())
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}

/// Per-store dependency tracking context.
#[derive(Debug, Default)]
pub struct Tracker {
    frames: RefCell<Vec<Frame>>,
}

/// Pops the frame it was created for when dropped.
struct FrameGuard<'a> {
    tracker: &'a Tracker,
    index: usize,
}

impl FrameGuard<'_> {
    /// Pop the recording frame and hand back its keys.
    fn finish(self) -> Vec<String> {
        let mut frames = self.tracker.frames.borrow_mut();
        let frame = frames.drain(self.index..).next();
        drop(frames);
        std::mem::forget(self);

        match frame {
            Some(Frame::Tracking(deps)) => deps.into_vec(),
            _ => Vec::new(),
        }
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.tracker.frames.borrow_mut().truncate(self.index);
    }
}

impl Tracker {
    /// Create an inactive tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while recording every key it reads.
    ///
    /// Fails with [`Error::ReentrantTracking`] if a tracking session is the
    /// innermost frame. Wrap the inner call in [`no_track`](Self::no_track)
    /// to start an independent session from inside another one.
    pub fn track<T, F>(&self, f: F) -> Result<Tracked<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        let index = {
            let mut frames = self.frames.borrow_mut();
            if matches!(frames.last(), Some(Frame::Tracking(_))) {
                return Err(Error::ReentrantTracking);
            }
            frames.push(Frame::Tracking(KeyList::new()));
            frames.len() - 1
        };
        let guard = FrameGuard {
            tracker: self,
            index,
        };

        let value = f()?;
        let deps = guard.finish();
        tracing::trace!(deps = ?deps, "tracked evaluation finished");

        Ok(Tracked { value, deps })
    }

    /// Run `f` with reads hidden from any enclosing tracking session.
    pub fn no_track<T, F>(&self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let index = {
            let mut frames = self.frames.borrow_mut();
            frames.push(Frame::NoTrack);
            frames.len() - 1
        };
        let _guard = FrameGuard {
            tracker: self,
            index,
        };

        f()
    }

    /// Record a read of `key` in the innermost frame, if it is recording.
    pub fn record(&self, key: &str) {
        if let Some(Frame::Tracking(deps)) = self.frames.borrow_mut().last_mut() {
            deps.push(key.to_string());
        }
    }

    /// Whether any tracking session is in progress.
    pub fn is_tracking(&self) -> bool {
        self.frames
            .borrow()
            .iter()
            .any(|frame| matches!(frame, Frame::Tracking(_)))
    }

    /// Whether a read right now would be recorded.
    pub fn is_recording(&self) -> bool {
        matches!(self.frames.borrow().last(), Some(Frame::Tracking(_)))
    }

    /// Number of frames on the stack.
    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_collects_reads_in_order() {
        let tracker = Tracker::new();
        assert!(!tracker.is_tracking());

        let tracked = tracker
            .track(|| {
                assert!(tracker.is_tracking());
                tracker.record("a");
                tracker.record("b");
                tracker.record("a");
                Ok(7)
            })
            .unwrap();

        assert_eq!(tracked.value, 7);
        assert_eq!(tracked.deps, vec!["a", "b", "a"]);
        assert_eq!(tracked.unique_deps(), vec!["a", "b"]);
        assert!(!tracker.is_tracking());
        assert_eq!(tracker.depth(), 0);
    }

    #[test]
    fn reads_outside_a_session_are_dropped() {
        let tracker = Tracker::new();
        tracker.record("ignored");

        let tracked = tracker.track(|| Ok(())).unwrap();
        assert!(tracked.deps.is_empty());
    }

    #[test]
    fn nested_track_is_rejected() {
        let tracker = Tracker::new();

        let result = tracker.track(|| {
            tracker.record("outer");
            let inner = tracker.track(|| Ok(()));
            assert!(inner.unwrap_err().is_reentrant());
            Ok(())
        });

        // The failed inner attempt must not disturb the outer session.
        assert_eq!(result.unwrap().deps, vec!["outer"]);
        assert!(!tracker.is_tracking());
    }

    #[test]
    fn no_track_hides_reads_and_allows_nesting() {
        let tracker = Tracker::new();

        let outer = tracker
            .track(|| {
                tracker.record("seen");
                let inner = tracker.no_track(|| {
                    tracker.record("hidden");
                    tracker.track(|| {
                        tracker.record("inner");
                        Ok(())
                    })
                })?;
                assert_eq!(inner.deps, vec!["inner"]);
                Ok(())
            })
            .unwrap();

        assert_eq!(outer.deps, vec!["seen"]);
    }

    #[test]
    fn error_unwinds_tracking_state() {
        let tracker = Tracker::new();

        let result: Result<Tracked<()>> = tracker.track(|| {
            tracker.record("a");
            Err(Error::selector("boom"))
        });

        assert!(matches!(result, Err(Error::Selector(_))));
        assert!(!tracker.is_tracking());
        assert_eq!(tracker.depth(), 0);

        // A later session starts clean.
        let tracked = tracker
            .track(|| {
                tracker.record("b");
                Ok(())
            })
            .unwrap();
        assert_eq!(tracked.deps, vec!["b"]);
    }

    #[test]
    fn panic_unwinds_tracking_state() {
        let tracker = Tracker::new();

        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = tracker.track::<(), _>(|| panic!("selector panicked"));
        }));

        assert!(caught.is_err());
        assert!(!tracker.is_tracking());
        assert_eq!(tracker.depth(), 0);
    }

    #[test]
    fn unique_keys_keeps_first_seen_order() {
        assert_eq!(unique_keys(&["b", "a", "b", "c", "a"]), vec!["b", "a", "c"]);
    }
}
