//! Job Scheduler
//!
//! A deduplicating queue for deferred re-runs. A computation scheduled
//! several times while the queue is pending runs once per flush, so a
//! burst of writes costs one re-run instead of one per write.
//!
//! The queue is thread-local: jobs run on the thread that scheduled them,
//! at an explicit flush point. [`flush_jobs`] drains in scheduling order
//! and is re-entrancy safe; a job that schedules further jobs extends the
//! same flush, and a flush requested from inside a running flush is a
//! no-op.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use super::effect::{ReactorId, Scheduler};

/// A queued unit of deferred work.
pub(crate) type Job = Arc<dyn Fn() + Send + Sync>;

thread_local! {
    static QUEUE: RefCell<IndexMap<ReactorId, Job>> = RefCell::new(IndexMap::new());
    static FLUSHING: Cell<bool> = const { Cell::new(false) };
}

/// Queue `job` under `id`. A job already queued under the same ID is kept
/// and the new one dropped; the computation runs once per flush either
/// way.
pub(crate) fn queue_job(id: ReactorId, job: Job) {
    QUEUE.with(|queue| {
        queue.borrow_mut().entry(id).or_insert(job);
    });
}

/// The number of computations waiting for the next flush.
pub fn pending_jobs() -> usize {
    QUEUE.with(|queue| queue.borrow().len())
}

struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        FLUSHING.with(|f| f.set(false));
    }
}

/// Drain the queue, running each job once in scheduling order.
///
/// Jobs queued by a running job join the same flush. Calling this from
/// inside a job is a no-op; the active flush picks the new work up.
pub fn flush_jobs() {
    if FLUSHING.with(|f| f.get()) {
        return;
    }
    FLUSHING.with(|f| f.set(true));
    let _guard = FlushGuard;

    loop {
        let next = QUEUE.with(|queue| queue.borrow_mut().shift_remove_index(0));
        match next {
            Some((id, job)) => {
                debug!(reactor = id.raw(), "flush job");
                job();
            }
            None => break,
        }
    }
}

/// Run `f`, then flush. Writes inside `f` that scheduled deferred
/// computations settle before this returns, each computation at most once.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let result = f();
    flush_jobs();
    result
}

/// An effect scheduler that queues re-runs instead of running them inline.
/// Pair with [`flush_jobs`] or [`batch`].
pub fn deferred() -> Scheduler {
    Arc::new(|effect| {
        let effect = effect.clone();
        queue_job(effect.id(), Arc::new(move || effect.run()));
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::{Effect, EffectOptions};
    use crate::reactive::observe::reactive;
    use crate::target::Target;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn deferred_counter(obj: &crate::reactive::observe::Observed) -> (Arc<AtomicI32>, Effect) {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_in = runs.clone();
        let reader = obj.clone();
        let effect = Effect::with_options(
            move || {
                let _ = reader.get("n");
                runs_in.fetch_add(1, Ordering::SeqCst);
            },
            EffectOptions {
                lazy: false,
                scheduler: Some(deferred()),
            },
        );
        (runs, effect)
    }

    #[test]
    fn burst_of_writes_runs_once_per_flush() {
        let obj = reactive(Target::object_from([("n", 0)]));
        let (runs, _effect) = deferred_counter(&obj);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        obj.set("n", 1).unwrap();
        obj.set("n", 2).unwrap();
        obj.set("n", 3).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(pending_jobs(), 1);

        flush_jobs();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(pending_jobs(), 0);
        assert_eq!(obj.get("n").as_number(), Some(3.0));
    }

    #[test]
    fn batch_flushes_on_exit() {
        let obj = reactive(Target::object_from([("n", 0)]));
        let (runs, _effect) = deferred_counter(&obj);

        let result = batch(|| {
            obj.set("n", 1).unwrap();
            obj.set("n", 2).unwrap();
            "done"
        });
        assert_eq!(result, "done");
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn distinct_computations_each_run() {
        let obj = reactive(Target::object_from([("n", 0)]));
        let (runs_a, _a) = deferred_counter(&obj);
        let (runs_b, _b) = deferred_counter(&obj);

        obj.set("n", 1).unwrap();
        assert_eq!(pending_jobs(), 2);
        flush_jobs();
        assert_eq!(runs_a.load(Ordering::SeqCst), 2);
        assert_eq!(runs_b.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn jobs_queued_mid_flush_join_the_same_flush() {
        let first = reactive(Target::object_from([("n", 0)]));
        let second = reactive(Target::object_from([("n", 0)]));

        // A deferred effect on `second`.
        let (runs_second, _second_effect) = deferred_counter(&second);

        // A deferred effect on `first` that writes to `second` when it
        // re-runs, queueing the second effect mid-flush.
        let runs_first = Arc::new(AtomicI32::new(0));
        let runs_first_in = runs_first.clone();
        let reader = first.clone();
        let writer = second.clone();
        let _first_effect = Effect::with_options(
            move || {
                let n = reader.get("n").as_number().unwrap_or(0.0);
                runs_first_in.fetch_add(1, Ordering::SeqCst);
                if n > 0.0 {
                    writer.set("n", n).unwrap();
                }
            },
            EffectOptions {
                lazy: false,
                scheduler: Some(deferred()),
            },
        );

        first.set("n", 5).unwrap();
        flush_jobs();
        assert_eq!(runs_first.load(Ordering::SeqCst), 2);
        assert_eq!(runs_second.load(Ordering::SeqCst), 2);
        assert_eq!(pending_jobs(), 0);
    }
}
