//! Weft Core
//!
//! A fine-grained reactive dependency-tracking engine. Computations declare
//! nothing; they simply read observed state, and the engine records which
//! precise properties each computation touched. When a property changes,
//! exactly the computations that read it re-run.
//!
//! # Architecture
//!
//! - [`value`]: the dynamic value model shared by all records.
//! - [`target`]: identity-addressed handles over mutable records.
//! - [`reactive`]: the dependency store, observation wrappers, effects,
//!   computed values, watchers, and the job scheduler.
//!
//! # Example
//!
//! ```rust
//! use weft_core::reactive::{computed, reactive, Effect};
//! use weft_core::target::Target;
//!
//! let state = reactive(Target::object_from([("count", 0)]));
//!
//! let source = state.clone();
//! let doubled = computed(move || {
//!     source.get("count").as_number().unwrap_or(0.0) * 2.0
//! });
//!
//! let reader = doubled.clone();
//! let _effect = Effect::new(move || {
//!     println!("doubled: {}", reader.get());
//! });
//!
//! // The effect re-runs automatically and prints "doubled: 10".
//! state.set("count", 5).unwrap();
//! ```

pub mod error;
pub mod reactive;
pub mod target;
pub mod value;

pub use error::{Error, Result};
pub use target::{Target, TargetId, TargetKind};
pub use value::Value;
