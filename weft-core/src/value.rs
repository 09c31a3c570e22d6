//! Dynamic Values
//!
//! The engine observes arbitrary mutable records, so it needs a dynamic
//! value model where a statically typed program would normally have
//! concrete types. A [`Value`] is either a primitive, a raw reference to a
//! mutable record ([`Value::Ref`]), or an observation wrapper handle
//! ([`Value::Obs`]).
//!
//! # Equality
//!
//! `Value` equality is same-value-zero:
//!
//! - `NaN` equals `NaN` (so overwriting a `NaN` property with `NaN` is not
//!   a change and triggers nothing).
//! - `-0.0` equals `+0.0`.
//! - `Ref` and `Obs` compare by the identity of the underlying target,
//!   regardless of which form they appear in. A wrapped element and the raw
//!   value it wraps are the same value.
//!
//! The `Hash` implementation is consistent with this relation, which lets
//! `Value` key map-like backing stores directly.
//!
//! # Invariant
//!
//! Raw backing stores never contain `Obs`. Every write path normalizes
//! wrappers back to raw references with [`Value::into_raw`]; wrappers only
//! appear in values returned from tracked reads.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::reactive::observe::Observed;
use crate::target::Target;

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    /// The absent value. Lookup misses produce this.
    #[default]
    Undefined,

    /// A boolean.
    Bool(bool),

    /// A number. All numbers are `f64`.
    Number(f64),

    /// An immutable string.
    Str(Arc<str>),

    /// A raw reference to a mutable record.
    Ref(Target),

    /// An observation wrapper over a mutable record.
    ///
    /// Never stored inside a raw record; see the module docs.
    Obs(Observed),
}

impl Value {
    /// Whether this is the absent value.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// The boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The numeric payload, if any.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The referenced target, whether raw or wrapped.
    pub fn as_target(&self) -> Option<&Target> {
        match self {
            Value::Ref(t) => Some(t),
            Value::Obs(o) => Some(o.target()),
            _ => None,
        }
    }

    /// The observation wrapper, if this value is one.
    pub fn as_observed(&self) -> Option<&Observed> {
        match self {
            Value::Obs(o) => Some(o),
            _ => None,
        }
    }

    /// Normalize an observation wrapper back to its raw reference.
    ///
    /// Applied on every write path so wrappers never reach a backing store.
    pub(crate) fn into_raw(self) -> Value {
        match self {
            Value::Obs(o) => Value::Ref(o.target().clone()),
            other => other,
        }
    }

    /// Same-value-zero comparison. This is what `==` delegates to.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => {
                (a.is_nan() && b.is_nan()) || a == b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (a, b) => match (a.as_target(), b.as_target()) {
                (Some(ta), Some(tb)) => ta.id() == tb.id(),
                _ => false,
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl Eq for Value {}

/// Hash bits for a number under same-value-zero: all NaNs collapse to one
/// bit pattern, and both zeros collapse to `+0.0`.
fn canonical_bits(n: f64) -> u64 {
    if n.is_nan() {
        f64::NAN.to_bits()
    } else if n == 0.0 {
        0.0f64.to_bits()
    } else {
        n.to_bits()
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Undefined => state.write_u8(0),
            Value::Bool(b) => {
                state.write_u8(1);
                b.hash(state);
            }
            Value::Number(n) => {
                state.write_u8(2);
                canonical_bits(*n).hash(state);
            }
            Value::Str(s) => {
                state.write_u8(3);
                s.hash(state);
            }
            // Ref and Obs share a tag: they hash (and compare) by target
            // identity.
            Value::Ref(t) => {
                state.write_u8(4);
                t.id().hash(state);
            }
            Value::Obs(o) => {
                state.write_u8(4);
                o.target().id().hash(state);
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Ref(t) => write!(f, "Ref({t:?})"),
            Value::Obs(o) => write!(f, "Obs({:?})", o.target()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s.as_str()))
    }
}

impl From<Target> for Value {
    fn from(t: Target) -> Self {
        Value::Ref(t)
    }
}

impl From<Observed> for Value {
    fn from(o: Observed) -> Self {
        Value::Obs(o)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
