//! Reactive Primitives
//!
//! This module implements the fine-grained reactive system: the dependency
//! store, observation wrappers, effects, computed values, watchers, and the
//! job scheduler.
//!
//! # Concepts
//!
//! ## Observation wrappers
//!
//! An [`Observed`] wraps a mutable record. Reading through it within a
//! tracking context (an effect, computed, or watcher source) registers that
//! context as a subscriber of the precise property read; writing through it
//! notifies exactly the subscribers the change implicates.
//!
//! ## Effects
//!
//! An [`Effect`] is a re-runnable computation. Its dependencies are
//! rediscovered on every run, so conditional reads subscribe only to the
//! branch actually taken.
//!
//! ## Computed values
//!
//! A [`Computed`] is a lazily evaluated, cached derivation. It recomputes
//! on read after a dependency changed, never eagerly.
//!
//! ## Watchers
//!
//! A watcher observes a source and hands `(new, old)` to a callback,
//! optionally deferred through the job scheduler.
//!
//! # Implementation Notes
//!
//! Dependency detection is automatic: a thread-local stack records the
//! running computation, and every tracked read attributes itself to the
//! top of the stack. This approach (sometimes called "transparent
//! reactivity") is used by SolidJS, Vue 3, and Leptos.

mod collection;
mod computed;
mod context;
mod effect;
// `observe` and `store` are crate-visible: record storage evicts its own
// subscription and wrapper-cache entries on drop.
pub(crate) mod observe;
mod scheduler;
pub(crate) mod store;
mod watch;

pub use computed::{computed, Computed};
pub use context::{is_tracking, untracked};
pub use effect::{Effect, EffectOptions, ReactorId, Scheduler};
pub use observe::{
    readonly, reactive, shallow_reactive, shallow_readonly, Observed, PropKey,
};
pub use scheduler::{batch, deferred, flush_jobs, pending_jobs};
pub use store::{ChangeKind, DepKey};
pub use watch::{watch, watch_value, Flush, OnInvalidate, WatchOptions, Watcher};
