//! Computed Values
//!
//! A [`Computed`] is a lazily evaluated, cached derivation. The getter runs
//! inside a lazy effect, so reads it performs are tracked; its result is
//! cached until a dependency changes.
//!
//! A computed is both subscriber and source. Toward its dependencies it is
//! an effect; toward its readers it is a target with a single synthetic
//! output key. When a dependency changes, the computed does not recompute.
//! It marks itself dirty and notifies its output subscribers; the next read
//! recomputes. A dependency change while already dirty notifies nothing,
//! so an unread computed collapses any number of upstream changes into one
//! downstream notification.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::trace;

use super::effect::{Effect, EffectOptions, Scheduler};
use super::store::{self, ChangeKind, DepKey};
use crate::target::TargetId;

struct ComputedInner<T> {
    /// Identity in the dependency store. Computed values track and trigger
    /// like targets but own no record.
    id: TargetId,
    dirty: AtomicBool,
    value: RwLock<Option<T>>,
    effect: Effect,
}

impl<T> ComputedInner<T> {
    /// Mark the cache stale and notify output subscribers. Collapses
    /// repeated invalidations between reads into one notification.
    fn invalidate(&self) {
        if !self.dirty.swap(true, Ordering::SeqCst) {
            trace!(id = self.id.raw(), "computed invalidated");
            store::trigger(self.id, None, &DepKey::Output, ChangeKind::Set, None);
        }
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        store::drop_target(self.id);
    }
}

/// A lazily evaluated, cached derivation. Cloning shares the cache.
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wrap `getter` into a computed value. The getter does not run until
    /// the first [`get`](Self::get).
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let id = TargetId::new();
        let inner = Arc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let body_weak = weak.clone();
            let body = move || {
                if let Some(inner) = body_weak.upgrade() {
                    let next = getter();
                    *inner.value.write() = Some(next);
                }
            };

            let sched_weak = weak.clone();
            let scheduler: Scheduler = Arc::new(move |_| {
                if let Some(inner) = sched_weak.upgrade() {
                    inner.invalidate();
                }
            });

            ComputedInner {
                id,
                dirty: AtomicBool::new(true),
                value: RwLock::new(None),
                effect: Effect::with_options(
                    body,
                    EffectOptions {
                        lazy: true,
                        scheduler: Some(scheduler),
                    },
                ),
            }
        });
        Self { inner }
    }

    /// Read the value, recomputing only if a dependency changed since the
    /// last read. The read joins the caller's dependencies under this
    /// computed's output key, so caller re-runs chain through it.
    pub fn get(&self) -> T {
        if self.inner.dirty.load(Ordering::SeqCst) {
            self.inner.effect.run();
            self.inner.dirty.store(false, Ordering::SeqCst);
        }
        store::track_orphan(self.inner.id, DepKey::Output);
        self.inner
            .value
            .read()
            .clone()
            .expect("computed getter produced no value")
    }

}

impl<T> Computed<T> {
    /// This computed's identity in the dependency store.
    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// Whether the next read will recompute.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }
}

impl<T> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id.raw())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

/// Shorthand for [`Computed::new`].
pub fn computed<T, F>(getter: F) -> Computed<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Computed::new(getter)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::Effect;
    use crate::reactive::observe::reactive;
    use crate::target::Target;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn lazy_until_first_read() {
        let computes = Arc::new(AtomicI32::new(0));
        let computes_in = computes.clone();

        let c = computed(move || {
            computes_in.fetch_add(1, Ordering::SeqCst);
            42
        });
        assert_eq!(computes.load(Ordering::SeqCst), 0);
        assert_eq!(c.get(), 42);
        assert_eq!(computes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn caches_until_a_dependency_changes() {
        let obj = reactive(Target::object_from([("n", 1)]));
        let computes = Arc::new(AtomicI32::new(0));
        let computes_in = computes.clone();

        let source = obj.clone();
        let c = computed(move || {
            computes_in.fetch_add(1, Ordering::SeqCst);
            source.get("n").as_number().unwrap_or(0.0) * 2.0
        });

        assert_eq!(c.get(), 2.0);
        assert_eq!(c.get(), 2.0);
        assert_eq!(computes.load(Ordering::SeqCst), 1);

        obj.set("n", 5).unwrap();
        // Invalidation alone does not recompute.
        assert_eq!(computes.load(Ordering::SeqCst), 1);
        assert!(c.is_dirty());

        assert_eq!(c.get(), 10.0);
        assert_eq!(computes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn repeated_invalidations_collapse() {
        let obj = reactive(Target::object_from([("n", 1)]));
        let source = obj.clone();
        let c = computed(move || source.get("n").as_number().unwrap_or(0.0));
        let _ = c.get();

        let runs = Arc::new(AtomicI32::new(0));
        let runs_in = runs.clone();
        let reader = c.clone();
        let _effect = Effect::new(move || {
            let _ = reader.get();
            runs_in.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        obj.set("n", 2).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // Drop the downstream subscription so the computed stays dirty and
        // further upstream writes have no one left to notify.
        drop(_effect);
        obj.set("n", 3).unwrap();
        obj.set("n", 4).unwrap();
        assert!(c.is_dirty());
        assert_eq!(c.get(), 4.0);
    }

    #[test]
    fn effects_chain_through_computeds() {
        let obj = reactive(Target::object_from([("n", 1)]));
        let source = obj.clone();
        let c = computed(move || source.get("n").as_number().unwrap_or(0.0) + 1.0);

        let seen = Arc::new(AtomicI32::new(0));
        let seen_in = seen.clone();
        let reader = c.clone();
        let _effect = Effect::new(move || {
            seen_in.store(reader.get() as i32, Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        obj.set("n", 9).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn computeds_nest() {
        let obj = reactive(Target::object_from([("n", 2)]));
        let source = obj.clone();
        let doubled = computed(move || source.get("n").as_number().unwrap_or(0.0) * 2.0);
        let inner = doubled.clone();
        let squared = computed(move || inner.get() * inner.get());

        assert_eq!(squared.get(), 16.0);

        obj.set("n", 3).unwrap();
        assert!(squared.is_dirty());
        assert_eq!(squared.get(), 36.0);
    }

    #[test]
    fn dropping_a_computed_evicts_its_output_entry() {
        let obj = reactive(Target::object_from([("n", 1)]));
        let source = obj.clone();
        let c = computed(move || source.get("n").as_number().unwrap_or(0.0));
        let id = c.id();

        let reader = c.clone();
        let effect = Effect::new(move || {
            let _ = reader.get();
        });
        assert!(store::has_entry(id));

        drop(effect);
        drop(c);
        assert!(!store::has_entry(id));

        // The upstream write resolves no stale subscriber.
        obj.set("n", 2).unwrap();
    }
}
