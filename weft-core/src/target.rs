//! Targets
//!
//! A [`Target`] is an identity-addressed handle over one mutable record:
//! a plain object, an array, a map, or a set. Targets are what the engine
//! observes; they are never copied, and every handle to the same record
//! shares the same [`TargetId`].
//!
//! # Ownership
//!
//! The dependency store and the wrapper caches are keyed by `TargetId` and
//! hold no strong reference to the record. When the last handle to a record
//! drops, its storage drops, and the `Drop` impl evicts the record's
//! dependency-store entry and wrapper-cache entries. The store is never the
//! reason a record stays alive.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;

use crate::value::Value;

/// Unique identifier for a target record.
///
/// Computed values also draw from this counter: they participate in the
/// track/trigger protocol as targets without owning a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(u64);

impl TargetId {
    /// Generate a new unique target ID.
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// The kind of record a target holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// A string-keyed record with ordinary property access.
    Object,
    /// An integer-indexed sequence with a `length`.
    Array,
    /// A map-like collection mutated through methods, not property writes.
    Map,
    /// A set-like collection mutated through methods, not property writes.
    Set,
}

impl TargetKind {
    /// Map-like and set-like records go through the collection adapter.
    pub fn is_collection(&self) -> bool {
        matches!(self, TargetKind::Map | TargetKind::Set)
    }
}

/// The raw backing storage of a record.
///
/// Insertion order is preserved for objects, maps, and sets, matching the
/// enumeration order consumers observe.
pub enum Raw {
    Object(IndexMap<Arc<str>, Value>),
    Array(Vec<Value>),
    Map(IndexMap<Value, Value>),
    Set(IndexSet<Value>),
}

impl Raw {
    fn kind(&self) -> TargetKind {
        match self {
            Raw::Object(_) => TargetKind::Object,
            Raw::Array(_) => TargetKind::Array,
            Raw::Map(_) => TargetKind::Map,
            Raw::Set(_) => TargetKind::Set,
        }
    }
}

pub(crate) struct TargetInner {
    id: TargetId,
    kind: TargetKind,
    raw: RwLock<Raw>,
}

impl Drop for TargetInner {
    fn drop(&mut self) {
        // The record is gone; nothing can read it or write it again, so its
        // subscription entry and memoized wrappers are unreachable too.
        crate::reactive::store::drop_target(self.id);
        crate::reactive::observe::evict(self.id, self.kind);
    }
}

/// A handle to one mutable record. Cloning shares the record.
#[derive(Clone)]
pub struct Target {
    inner: Arc<TargetInner>,
}

impl Target {
    fn from_raw(raw: Raw) -> Self {
        Self {
            inner: Arc::new(TargetInner {
                id: TargetId::new(),
                kind: raw.kind(),
                raw: RwLock::new(raw),
            }),
        }
    }

    /// Create an empty plain object.
    pub fn object() -> Self {
        Self::from_raw(Raw::Object(IndexMap::new()))
    }

    /// Create a plain object from `(key, value)` pairs.
    pub fn object_from<K, V, I>(entries: I) -> Self
    where
        K: Into<Arc<str>>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into().into_raw()))
            .collect();
        Self::from_raw(Raw::Object(map))
    }

    /// Create an empty array.
    pub fn array() -> Self {
        Self::from_raw(Raw::Array(Vec::new()))
    }

    /// Create an array from a sequence of values.
    pub fn array_from<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        let vec = items.into_iter().map(|v| v.into().into_raw()).collect();
        Self::from_raw(Raw::Array(vec))
    }

    /// Create an empty map.
    pub fn map() -> Self {
        Self::from_raw(Raw::Map(IndexMap::new()))
    }

    /// Create a map from `(key, value)` pairs.
    pub fn map_from<K, V, I>(entries: I) -> Self
    where
        K: Into<Value>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into().into_raw(), v.into().into_raw()))
            .collect();
        Self::from_raw(Raw::Map(map))
    }

    /// Create an empty set.
    pub fn set() -> Self {
        Self::from_raw(Raw::Set(IndexSet::new()))
    }

    /// Create a set from a sequence of values.
    pub fn set_from<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        let set = items.into_iter().map(|v| v.into().into_raw()).collect();
        Self::from_raw(Raw::Set(set))
    }

    /// This record's identity.
    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// What kind of record this is.
    pub fn kind(&self) -> TargetKind {
        self.inner.kind
    }

    /// Run `f` with shared access to the raw storage.
    pub(crate) fn with_raw<R>(&self, f: impl FnOnce(&Raw) -> R) -> R {
        f(&self.inner.raw.read())
    }

    /// Run `f` with exclusive access to the raw storage.
    ///
    /// Callers must not dispatch triggers while the lock is held; mutation
    /// methods collect pending triggers and dispatch after releasing it.
    pub(crate) fn with_raw_mut<R>(&self, f: impl FnOnce(&mut Raw) -> R) -> R {
        f(&mut self.inner.raw.write())
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.inner.id.raw())
            .field("kind", &self.inner.kind)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
