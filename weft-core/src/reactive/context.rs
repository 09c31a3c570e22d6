//! Tracking Context
//!
//! The tracking context records which computation is currently running.
//! This enables automatic dependency collection: when an observed property
//! is read, the read is attributed to the computation at the top of the
//! stack.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Entering a computation pushes a
//! frame; leaving pops it. Nested computations therefore never contaminate
//! each other's subscriptions: a read that happens while an inner
//! computation runs records the inner one, and popping restores the outer.
//!
//! Each frame carries a handle to its computation's own dependency-location
//! list. [`record`] appends directly into that list, so the list and the
//! dependency store stay consistent even if the computation's body panics
//! mid-run.
//!
//! A separate thread-local pause counter suppresses tracking entirely; the
//! array mutators use it around their internal `length` reads, and
//! [`untracked`] exposes it to callers.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::effect::ReactorId;
use super::store::DepKey;
use crate::target::TargetId;

/// The dependency locations a computation joined during its latest run.
pub(crate) type DepList = SmallVec<[(TargetId, DepKey); 8]>;

struct Frame {
    reactor: ReactorId,
    deps: Arc<Mutex<DepList>>,
}

thread_local! {
    static STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
    static PAUSED: Cell<usize> = const { Cell::new(0) };
}

/// Guard that pops the tracking stack when dropped.
///
/// Dropping on unwind keeps the stack consistent if a computation panics.
pub(crate) struct TrackScope {
    reactor: ReactorId,
}

impl TrackScope {
    /// Enter a tracking frame for `reactor`. Reads performed until the
    /// returned guard drops are attributed to it and appended to `deps`.
    pub(crate) fn enter(reactor: ReactorId, deps: Arc<Mutex<DepList>>) -> Self {
        STACK.with(|stack| {
            stack.borrow_mut().push(Frame { reactor, deps });
        });
        Self { reactor }
    }
}

impl Drop for TrackScope {
    fn drop(&mut self) {
        STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(frame) = popped {
                debug_assert_eq!(
                    frame.reactor, self.reactor,
                    "tracking stack mismatch: expected {:?}, got {:?}",
                    self.reactor, frame.reactor
                );
            }
        });
    }
}

/// The computation currently at the top of the stack, ignoring the pause
/// flag. Used by the trigger dispatch to skip the active computation.
pub(crate) fn active_reactor() -> Option<ReactorId> {
    STACK.with(|stack| stack.borrow().last().map(|f| f.reactor))
}

/// Whether a read at this point would be tracked.
pub fn is_tracking() -> bool {
    PAUSED.with(|p| p.get() == 0) && STACK.with(|stack| !stack.borrow().is_empty())
}

/// Attribute a read of `(target, key)` to the active computation.
///
/// Returns the computation's ID when tracking is live, after appending the
/// location to the computation's own dependency list. Returns `None` when
/// no computation is active or tracking is paused.
pub(crate) fn record(target: TargetId, key: DepKey) -> Option<ReactorId> {
    if PAUSED.with(|p| p.get() > 0) {
        return None;
    }
    STACK.with(|stack| {
        let stack = stack.borrow();
        let frame = stack.last()?;
        frame.deps.lock().push((target, key));
        Some(frame.reactor)
    })
}

struct PauseGuard;

impl Drop for PauseGuard {
    fn drop(&mut self) {
        PAUSED.with(|p| p.set(p.get() - 1));
    }
}

/// Run `f` with dependency tracking suppressed.
///
/// Reads inside `f` still return current values but join no subscriptions.
/// Nesting is allowed; tracking resumes when the outermost call returns.
pub fn untracked<T>(f: impl FnOnce() -> T) -> T {
    PAUSED.with(|p| p.set(p.get() + 1));
    let _guard = PauseGuard;
    f()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
