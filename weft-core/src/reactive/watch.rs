//! Watchers
//!
//! A watcher separates the observed source from the reaction. The source
//! getter runs inside a lazy effect, so its reads are tracked; when any of
//! them changes, the watcher re-evaluates the source and hands `(new, old)`
//! to a callback instead of re-running arbitrary user code inline.
//!
//! # Timing
//!
//! [`Flush::Sync`] fires the callback inside the write that triggered it.
//! [`Flush::Post`] queues the re-evaluation on the [job
//! scheduler](super::scheduler); a burst of writes before the next
//! [`flush_jobs`](super::scheduler::flush_jobs) fires the callback once,
//! with the settled value.
//!
//! # Invalidation
//!
//! A callback may register cleanup through [`OnInvalidate`]. The cleanup
//! runs before the next callback invocation, so reactions that race
//! against their own earlier runs (request/response patterns) can cancel
//! the stale run first.

use std::any::Any;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::effect::{Effect, EffectOptions, Scheduler};
use super::observe::Observed;
use super::scheduler;
use crate::value::Value;

/// When a watcher's callback fires relative to the triggering write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Flush {
    /// Inside the triggering write.
    #[default]
    Sync,
    /// Deferred to the next job-queue flush, deduplicated.
    Post,
}

/// Construction options for [`watch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Fire the callback immediately at construction, with no old value.
    pub immediate: bool,
    /// Callback timing.
    pub flush: Flush,
}

type Cleanup = Box<dyn FnOnce() + Send>;

/// Registers cleanup to run before the callback's next invocation.
///
/// Only the last registration per invocation is kept.
pub struct OnInvalidate {
    slot: Arc<Mutex<Option<Cleanup>>>,
}

impl OnInvalidate {
    /// Register `f` to run before the next callback invocation (or never,
    /// if the watcher stops first).
    pub fn register(&self, f: impl FnOnce() + Send + 'static) {
        *self.slot.lock() = Some(Box::new(f));
    }
}

type WatchCallback<T> = Box<dyn Fn(&T, Option<&T>, &OnInvalidate) + Send + Sync>;

struct WatchInner<T> {
    effect: Effect,
    /// The source value produced by the latest effect run.
    current: Mutex<Option<T>>,
    previous: Mutex<Option<T>>,
    callback: WatchCallback<T>,
    cleanup: Arc<Mutex<Option<Cleanup>>>,
}

/// Re-evaluate the source and fire the callback with `(new, old)`.
fn run_watch_job<T>(inner: &Arc<WatchInner<T>>)
where
    T: Clone + Send + Sync + 'static,
{
    if inner.effect.is_disposed() {
        return;
    }
    // Take before invoking; the cleanup may write through the store and
    // re-enter this job, which must not find the slot locked.
    let cleanup = inner.cleanup.lock().take();
    if let Some(cleanup) = cleanup {
        cleanup();
    }
    inner.effect.run();
    let new = inner
        .current
        .lock()
        .clone()
        .expect("watch source produced no value");
    let previous = inner.previous.lock().take();
    let invalidate = OnInvalidate {
        slot: Arc::clone(&inner.cleanup),
    };
    (inner.callback)(&new, previous.as_ref(), &invalidate);
    *inner.previous.lock() = Some(new);
}

/// A handle that keeps a watcher alive. Dropping it (or calling
/// [`stop`](Self::stop)) permanently stops the watcher.
pub struct Watcher {
    effect: Effect,
    _inner: Arc<dyn Any + Send + Sync>,
}

impl Watcher {
    /// Permanently stop the watcher. The callback never fires again, even
    /// from re-evaluations already queued.
    pub fn stop(&self) {
        self.effect.dispose();
    }

    /// Whether the watcher has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.effect.is_disposed()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.effect.dispose();
    }
}

/// Watch `source` and call `callback(new, old, on_invalidate)` when its
/// tracked reads change.
///
/// Without `immediate`, the source is evaluated once at construction to
/// collect dependencies and seed the old value, and the callback first
/// fires on the first change. With `immediate`, the callback also fires at
/// construction, with no old value.
pub fn watch<T, F, C>(source: F, callback: C, options: WatchOptions) -> Watcher
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
    C: Fn(&T, Option<&T>, &OnInvalidate) + Send + Sync + 'static,
{
    let inner = Arc::new_cyclic(|weak: &Weak<WatchInner<T>>| {
        let body_weak = weak.clone();
        let body = move || {
            if let Some(inner) = body_weak.upgrade() {
                let value = source();
                *inner.current.lock() = Some(value);
            }
        };

        let sched_weak = weak.clone();
        let flush = options.flush;
        let effect_scheduler: Scheduler = Arc::new(move |effect| {
            let Some(inner) = sched_weak.upgrade() else {
                return;
            };
            match flush {
                Flush::Sync => run_watch_job(&inner),
                Flush::Post => {
                    let job_inner = Arc::clone(&inner);
                    scheduler::queue_job(
                        effect.id(),
                        Arc::new(move || run_watch_job(&job_inner)),
                    );
                }
            }
        });

        WatchInner {
            effect: Effect::with_options(
                body,
                EffectOptions {
                    lazy: true,
                    scheduler: Some(effect_scheduler),
                },
            ),
            current: Mutex::new(None),
            previous: Mutex::new(None),
            callback: Box::new(callback),
            cleanup: Arc::new(Mutex::new(None)),
        }
    });

    if options.immediate {
        run_watch_job(&inner);
    } else {
        inner.effect.run();
        *inner.previous.lock() = inner.current.lock().clone();
    }

    Watcher {
        effect: inner.effect.clone(),
        _inner: inner,
    }
}

/// Watch an observed record deeply: every reachable property counts as a
/// dependency. The callback receives the record itself; since it mutates
/// in place, new and old are the same record.
pub fn watch_value<C>(source: &Observed, callback: C, options: WatchOptions) -> Watcher
where
    C: Fn(&Value, Option<&Value>, &OnInvalidate) + Send + Sync + 'static,
{
    let source = source.clone();
    watch(
        move || {
            source.traverse();
            Value::Obs(source.clone())
        },
        callback,
        options,
    )
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
