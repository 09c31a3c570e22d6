//! Effect Runtime
//!
//! An [`Effect`] is a re-runnable computation. While it runs, every
//! observed read it performs joins a dependency set in the store; when any
//! of those dependencies changes, the effect is notified and either re-runs
//! synchronously or is handed to its scheduler.
//!
//! # Re-running
//!
//! Every run starts from a clean slate: the effect is removed from each
//! dependency set it joined on its previous run, then the body executes
//! inside a fresh tracking frame and rejoins exactly what it reads this
//! time. Branches not taken stop receiving notifications. Cleanup happens
//! before the body is invoked, so a panicking body cannot leave stale
//! subscriptions behind.
//!
//! # Options
//!
//! - `lazy`: do not run at construction. Computed values and watchers build
//!   on lazy effects and invoke the first run themselves.
//! - `scheduler`: called with the effect instead of re-running it when a
//!   dependency changes. The scheduler decides if, when, and how the
//!   re-run happens.
//!
//! # Registry
//!
//! The dependency store holds reactor IDs, not computations. A global
//! registry maps IDs to weak handles so triggers can resolve live
//! computations without keeping disposed ones alive.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use indexmap::IndexSet;
use parking_lot::Mutex;

use super::context::{DepList, TrackScope};
use super::store;

/// Unique identifier for a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReactorId(u64);

impl ReactorId {
    /// Generate a new unique reactor ID.
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A computation the store can notify.
pub(crate) trait Reactive: Send + Sync {
    fn id(&self) -> ReactorId;

    /// Whether the computation has been permanently stopped.
    fn is_disposed(&self) -> bool;

    /// Apply the dispatch rule: re-run directly, or hand off to the
    /// computation's scheduler.
    fn notify(self: Arc<Self>);
}

static REGISTRY: OnceLock<DashMap<ReactorId, Weak<dyn Reactive>>> = OnceLock::new();

fn registry() -> &'static DashMap<ReactorId, Weak<dyn Reactive>> {
    REGISTRY.get_or_init(DashMap::new)
}

pub(crate) fn register(id: ReactorId, reactive: Weak<dyn Reactive>) {
    registry().insert(id, reactive);
}

pub(crate) fn unregister(id: ReactorId) {
    registry().remove(&id);
}

/// Upgrade a snapshot of reactor IDs to live computations, in order.
/// Dead and disposed entries are skipped.
pub(crate) fn resolve(ids: &IndexSet<ReactorId>) -> Vec<Arc<dyn Reactive>> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(entry) = registry().get(id) {
            if let Some(reactive) = entry.value().upgrade() {
                if !reactive.is_disposed() {
                    out.push(reactive);
                }
            }
        }
    }
    out
}

/// A custom re-run policy. Invoked with the effect whenever one of its
/// dependencies changes.
pub type Scheduler = Arc<dyn Fn(&Effect) + Send + Sync>;

/// Construction options for [`Effect::with_options`].
#[derive(Default)]
pub struct EffectOptions {
    /// Skip the initial run; the caller invokes [`Effect::run`] itself.
    pub lazy: bool,
    /// Re-run policy. `None` means re-run synchronously on trigger.
    pub scheduler: Option<Scheduler>,
}

pub(crate) struct EffectInner {
    id: ReactorId,
    body: Box<dyn Fn() + Send + Sync>,
    deps: Arc<Mutex<DepList>>,
    scheduler: Option<Scheduler>,
    disposed: AtomicBool,
}

impl Reactive for EffectInner {
    fn id(&self) -> ReactorId {
        self.id
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn notify(self: Arc<Self>) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let effect = Effect { inner: self };
        match effect.inner.scheduler.clone() {
            Some(scheduler) => scheduler(&effect),
            None => effect.run(),
        }
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        let stale = std::mem::take(&mut *self.deps.lock());
        store::remove_reactor(&stale, self.id);
        unregister(self.id);
    }
}

/// A re-runnable reactive computation. Cloning shares the computation.
///
/// Dropping the last handle removes the effect from every dependency set
/// it joined.
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Wrap `body` into an effect and run it once immediately to establish
    /// its initial dependencies.
    pub fn new<F>(body: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_options(body, EffectOptions::default())
    }

    /// Wrap `body` into an effect with explicit options.
    pub fn with_options<F>(body: F, options: EffectOptions) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let inner = Arc::new(EffectInner {
            id: ReactorId::new(),
            body: Box::new(body),
            deps: Arc::new(Mutex::new(DepList::new())),
            scheduler: options.scheduler,
            disposed: AtomicBool::new(false),
        });
        let weak = Arc::downgrade(&inner) as Weak<dyn Reactive>;
        register(inner.id, weak);

        let effect = Self { inner };
        if !options.lazy {
            effect.run();
        }
        effect
    }

    /// This computation's ID.
    pub fn id(&self) -> ReactorId {
        self.inner.id
    }

    /// Execute the body, rebuilding the dependency list from scratch.
    pub fn run(&self) {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return;
        }

        // Leave every set joined on the previous run before the body gets a
        // chance to fail; a half-completed run must not keep old bindings.
        let stale = std::mem::take(&mut *self.inner.deps.lock());
        store::remove_reactor(&stale, self.inner.id);

        let _scope = TrackScope::enter(self.inner.id, Arc::clone(&self.inner.deps));
        (self.inner.body)();
    }

    /// Permanently stop the effect. It will never run again, regardless of
    /// triggers or explicit [`Effect::run`] calls.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
    }

    /// Whether the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// The number of dependency locations joined by the latest run.
    pub fn dependency_count(&self) -> usize {
        self.inner.deps.lock().len()
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
