//! Observation Wrappers
//!
//! An [`Observed`] is a transparent façade over exactly one [`Target`]:
//! reads go through [`track`](super::store::track), writes and deletes go
//! through [`trigger`](super::store::trigger). Two flags control behavior:
//!
//! - `shallow`: nested records are returned raw instead of wrapped.
//! - `readonly`: mutation is rejected with a diagnostic, and reads are not
//!   tracked (an immutable record can never notify anyone).
//!
//! Nested wrapping is lazy: a nested record is wrapped on first read, not
//! eagerly at creation, and a read-only wrapper wraps nested records as
//! read-only.
//!
//! # Memoization
//!
//! Wrapper creation is memoized per `(target, flags)` in a weak cache, so
//! repeated wrapping returns the same façade and identity comparisons stay
//! stable. Plain-record wrappers and collection wrappers live in separate
//! caches since they expose different operation sets. Cache entries hold
//! weak references only and are evicted when the record's storage drops.
//!
//! This module implements the plain-object and array operations; the
//! map/set methods live in [`collection`](super::collection).

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use tracing::warn;

use super::context;
use super::store::{self, ChangeKind, DepKey};
use crate::error::{Error, Result};
use crate::target::{Raw, Target, TargetId, TargetKind};
use crate::value::Value;

/// A property key on a plain object or array.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropKey {
    /// A named property.
    Name(Arc<str>),
    /// An array index.
    Index(usize),
    /// The array `length` pseudo-property.
    Length,
}

impl From<&str> for PropKey {
    fn from(s: &str) -> Self {
        PropKey::Name(Arc::from(s))
    }
}

impl From<String> for PropKey {
    fn from(s: String) -> Self {
        PropKey::Name(Arc::from(s.as_str()))
    }
}

impl From<Arc<str>> for PropKey {
    fn from(s: Arc<str>) -> Self {
        PropKey::Name(s)
    }
}

impl From<usize> for PropKey {
    fn from(i: usize) -> Self {
        PropKey::Index(i)
    }
}

/// Objects treat every key as a name: indices and `length` fold into their
/// string forms, the way dynamic records address them.
fn object_name(key: PropKey) -> Arc<str> {
    match key {
        PropKey::Name(n) => n,
        PropKey::Index(i) => Arc::from(i.to_string().as_str()),
        PropKey::Length => Arc::from("length"),
    }
}

struct ObservedCore {
    target: Target,
    shallow: bool,
    readonly: bool,
}

/// An observation wrapper over one target. Cloning shares the façade.
#[derive(Clone)]
pub struct Observed {
    core: Arc<ObservedCore>,
}

type WrapperCache = DashMap<(TargetId, u8), Weak<ObservedCore>>;

static RECORD_WRAPPERS: OnceLock<WrapperCache> = OnceLock::new();
static COLLECTION_WRAPPERS: OnceLock<WrapperCache> = OnceLock::new();

fn cache_for(kind: TargetKind) -> &'static WrapperCache {
    if kind.is_collection() {
        COLLECTION_WRAPPERS.get_or_init(DashMap::new)
    } else {
        RECORD_WRAPPERS.get_or_init(DashMap::new)
    }
}

fn flag_bits(shallow: bool, readonly: bool) -> u8 {
    (shallow as u8) | ((readonly as u8) << 1)
}

/// Drop a record's memoized wrappers. Called when its storage drops; the
/// remaining entries are dead weak references by then.
pub(crate) fn evict(id: TargetId, kind: TargetKind) {
    let cache = cache_for(kind);
    for bits in 0..4u8 {
        cache.remove(&(id, bits));
    }
}

fn observe(target: Target, shallow: bool, readonly: bool) -> Observed {
    let key = (target.id(), flag_bits(shallow, readonly));
    let cache = cache_for(target.kind());

    if let Some(entry) = cache.get(&key) {
        if let Some(core) = entry.value().upgrade() {
            return Observed { core };
        }
    }

    let core = Arc::new(ObservedCore {
        target,
        shallow,
        readonly,
    });
    cache.insert(key, Arc::downgrade(&core));
    Observed { core }
}

/// Wrap a target so reads subscribe and writes notify, recursively.
pub fn reactive(target: Target) -> Observed {
    observe(target, false, false)
}

/// Like [`reactive`], but nested records are returned raw.
pub fn shallow_reactive(target: Target) -> Observed {
    observe(target, true, false)
}

/// Wrap a target as deeply read-only: mutation no-ops with a diagnostic,
/// reads are never tracked.
pub fn readonly(target: Target) -> Observed {
    observe(target, false, true)
}

/// Like [`readonly`], but nested records are returned raw.
pub fn shallow_readonly(target: Target) -> Observed {
    observe(target, true, true)
}

/// A pending notification collected under the raw-storage lock and
/// dispatched after it is released.
pub(crate) type Pending = (DepKey, ChangeKind, Option<usize>);

impl Observed {
    /// The wrapped target.
    pub fn target(&self) -> &Target {
        &self.core.target
    }

    /// Whether nested records are returned raw.
    pub fn is_shallow(&self) -> bool {
        self.core.shallow
    }

    /// Whether mutation is rejected.
    pub fn is_readonly(&self) -> bool {
        self.core.readonly
    }

    pub(crate) fn kind(&self) -> TargetKind {
        self.core.target.kind()
    }

    pub(crate) fn track(&self, key: DepKey) {
        if !self.core.readonly {
            store::track(&self.core.target, key);
        }
    }

    pub(crate) fn dispatch(&self, pending: impl IntoIterator<Item = Pending>) {
        let id = self.core.target.id();
        let kind = self.kind();
        for (key, change, new_len) in pending {
            store::trigger(id, Some(kind), &key, change, new_len);
        }
    }

    /// Lazily wrap a nested record read through this façade.
    pub(crate) fn wrap_nested(&self, value: Value) -> Value {
        if self.core.shallow {
            return value;
        }
        match value {
            Value::Ref(t) => Value::Obs(observe(t, false, self.core.readonly)),
            other => other,
        }
    }

    fn require_array(&self, op: &'static str) -> Result<()> {
        match self.kind() {
            TargetKind::Array => Ok(()),
            kind => Err(Error::UnsupportedOp { op, kind }),
        }
    }

    /// Read a property. A miss reads as [`Value::Undefined`] and is still
    /// tracked, so adding the key later notifies correctly.
    pub fn get(&self, key: impl Into<PropKey>) -> Value {
        let key = key.into();
        match self.kind() {
            TargetKind::Object => {
                let name = object_name(key);
                self.track(DepKey::Name(name.clone()));
                let value = self.core.target.with_raw(|raw| match raw {
                    Raw::Object(map) => map.get(&name).cloned().unwrap_or_default(),
                    _ => Value::Undefined,
                });
                self.wrap_nested(value)
            }
            TargetKind::Array => match key {
                PropKey::Index(i) => {
                    self.track(DepKey::Index(i));
                    let value = self.core.target.with_raw(|raw| match raw {
                        Raw::Array(items) => items.get(i).cloned().unwrap_or_default(),
                        _ => Value::Undefined,
                    });
                    self.wrap_nested(value)
                }
                PropKey::Length => {
                    self.track(DepKey::Length);
                    let len = self.core.target.with_raw(|raw| match raw {
                        Raw::Array(items) => items.len(),
                        _ => 0,
                    });
                    Value::Number(len as f64)
                }
                PropKey::Name(name) => {
                    warn!(%name, "named property read on an array target");
                    Value::Undefined
                }
            },
            kind => {
                warn!(?kind, "property read on a collection target; use the entry methods");
                Value::Undefined
            }
        }
    }

    /// Write a property.
    ///
    /// Classifies the write as an addition or an overwrite, compares old
    /// and new with same-value-zero semantics (so `NaN` over `NaN` is not
    /// a change), performs the write, then notifies.
    pub fn set(&self, key: impl Into<PropKey>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        if self.core.readonly {
            warn!(?key, "write rejected: target is readonly");
            return Ok(());
        }
        let value = value.into().into_raw();

        match self.kind() {
            TargetKind::Object => {
                let name = object_name(key);
                let pending = self.core.target.with_raw_mut(|raw| {
                    let Raw::Object(map) = raw else { return None };
                    match map.insert(name.clone(), value.clone()) {
                        None => Some((DepKey::Name(name.clone()), ChangeKind::Add, None)),
                        Some(old) if !old.same_value(&value) => {
                            Some((DepKey::Name(name.clone()), ChangeKind::Set, None))
                        }
                        Some(_) => None,
                    }
                });
                self.dispatch(pending);
                Ok(())
            }
            TargetKind::Array => match key {
                PropKey::Index(i) => {
                    let pending = self.core.target.with_raw_mut(|raw| {
                        let Raw::Array(items) = raw else { return None };
                        if i < items.len() {
                            let old = std::mem::replace(&mut items[i], value.clone());
                            (!old.same_value(&value))
                                .then_some((DepKey::Index(i), ChangeKind::Set, None))
                        } else {
                            // Writing past the end grows the array; the gap
                            // reads as Undefined.
                            items.resize(i, Value::Undefined);
                            items.push(value.clone());
                            Some((DepKey::Index(i), ChangeKind::Add, None))
                        }
                    });
                    self.dispatch(pending);
                    Ok(())
                }
                PropKey::Length => {
                    let requested = value.as_number().ok_or(Error::InvalidLength)?;
                    if requested < 0.0 || requested.fract() != 0.0 || requested > u32::MAX as f64 {
                        return Err(Error::InvalidLength);
                    }
                    let new_len = requested as usize;
                    let pending = self.core.target.with_raw_mut(|raw| {
                        let Raw::Array(items) = raw else { return None };
                        if items.len() == new_len {
                            return None;
                        }
                        items.resize(new_len, Value::Undefined);
                        Some((DepKey::Length, ChangeKind::Set, Some(new_len)))
                    });
                    self.dispatch(pending);
                    Ok(())
                }
                PropKey::Name(_) => Err(Error::UnsupportedOp {
                    op: "set",
                    kind: TargetKind::Array,
                }),
            },
            kind => Err(Error::UnsupportedOp { op: "set", kind }),
        }
    }

    /// Delete a named property. Triggers a structural delete only when the
    /// key actually existed.
    pub fn delete(&self, key: impl Into<PropKey>) -> Result<bool> {
        let key = key.into();
        if self.core.readonly {
            warn!(?key, "delete rejected: target is readonly");
            return Ok(false);
        }
        match self.kind() {
            TargetKind::Object => {
                let name = object_name(key);
                let removed = self.core.target.with_raw_mut(|raw| {
                    let Raw::Object(map) = raw else { return None };
                    map.shift_remove(&name)
                });
                let existed = removed.is_some();
                if existed {
                    self.dispatch([(DepKey::Name(name), ChangeKind::Delete, None)]);
                }
                Ok(existed)
            }
            kind => Err(Error::UnsupportedOp { op: "delete", kind }),
        }
    }

    /// Membership test. Tracks the specific key and the enumeration token.
    pub fn has(&self, key: impl Into<PropKey>) -> bool {
        let key = key.into();
        match self.kind() {
            TargetKind::Object => {
                let name = object_name(key);
                self.track(DepKey::Name(name.clone()));
                self.track(DepKey::Iterate);
                self.core.target.with_raw(|raw| match raw {
                    Raw::Object(map) => map.contains_key(&name),
                    _ => false,
                })
            }
            TargetKind::Array => match key {
                PropKey::Index(i) => {
                    self.track(DepKey::Index(i));
                    self.track(DepKey::Length);
                    self.core.target.with_raw(|raw| match raw {
                        Raw::Array(items) => i < items.len(),
                        _ => false,
                    })
                }
                PropKey::Length => true,
                PropKey::Name(_) => false,
            },
            kind => {
                warn!(?kind, "membership test on a collection target; use contains");
                false
            }
        }
    }

    /// Enumerate keys. Objects track the enumeration token; arrays track
    /// `length`, since their enumeration is length-driven.
    pub fn keys(&self) -> Vec<PropKey> {
        match self.kind() {
            TargetKind::Object => {
                self.track(DepKey::Iterate);
                self.core.target.with_raw(|raw| match raw {
                    Raw::Object(map) => map.keys().cloned().map(PropKey::Name).collect(),
                    _ => Vec::new(),
                })
            }
            TargetKind::Array => {
                self.track(DepKey::Length);
                let len = self.core.target.with_raw(|raw| match raw {
                    Raw::Array(items) => items.len(),
                    _ => 0,
                });
                (0..len).map(PropKey::Index).collect()
            }
            kind => {
                warn!(?kind, "key enumeration on a collection target; use keys_iter");
                Vec::new()
            }
        }
    }

    /// Enumerate `(key, value)` pairs with lazily wrapped values.
    ///
    /// Reads every value, so each key is tracked individually on top of
    /// the structural token; an overwrite of any enumerated value
    /// re-notifies, not just additions and removals.
    pub fn entries(&self) -> Vec<(PropKey, Value)> {
        match self.kind() {
            TargetKind::Object => {
                self.track(DepKey::Iterate);
                let snapshot: Vec<(Arc<str>, Value)> =
                    self.core.target.with_raw(|raw| match raw {
                        Raw::Object(map) => {
                            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
                        }
                        _ => Vec::new(),
                    });
                snapshot
                    .into_iter()
                    .map(|(k, v)| {
                        self.track(DepKey::Name(k.clone()));
                        (PropKey::Name(k), self.wrap_nested(v))
                    })
                    .collect()
            }
            TargetKind::Array => {
                self.track(DepKey::Length);
                let snapshot: Vec<Value> = self.core.target.with_raw(|raw| match raw {
                    Raw::Array(items) => items.clone(),
                    _ => Vec::new(),
                });
                snapshot
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| {
                        self.track(DepKey::Index(i));
                        (PropKey::Index(i), self.wrap_nested(v))
                    })
                    .collect()
            }
            kind => {
                warn!(?kind, "entry enumeration on a collection target; use entries_iter");
                Vec::new()
            }
        }
    }

    /// Enumerate values with lazy wrapping. Tracks like [`entries`](Self::entries).
    pub fn values(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, v)| v).collect()
    }

    /// Element or entry count. Arrays track `length`; everything else
    /// tracks the enumeration token (the count only changes structurally).
    pub fn len(&self) -> usize {
        match self.kind() {
            TargetKind::Array => {
                self.track(DepKey::Length);
            }
            _ => {
                self.track(DepKey::Iterate);
            }
        }
        self.core.target.with_raw(|raw| match raw {
            Raw::Object(map) => map.len(),
            Raw::Array(items) => items.len(),
            Raw::Map(map) => map.len(),
            Raw::Set(set) => set.len(),
        })
    }

    /// Whether the record has no keys or elements. Tracks like [`len`].
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------
    // Array methods
    // ------------------------------------------------------------------

    /// The internal `length` read the native mutators perform must not
    /// leak into the running computation's dependencies, or a mutating
    /// computation would subscribe to `length` and re-trigger itself.
    fn internal_len(&self) -> usize {
        context::untracked(|| self.get(PropKey::Length))
            .as_number()
            .unwrap_or(0.0) as usize
    }

    /// Append an element. Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        self.require_array("push")?;
        if self.core.readonly {
            warn!("push rejected: target is readonly");
            return Ok(self.internal_len());
        }
        let value = value.into().into_raw();
        let index = self.internal_len();
        let new_len = self.core.target.with_raw_mut(|raw| {
            let Raw::Array(items) = raw else { return 0 };
            items.push(value);
            items.len()
        });
        self.dispatch([(DepKey::Index(index), ChangeKind::Add, None)]);
        Ok(new_len)
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Result<Value> {
        self.require_array("pop")?;
        if self.core.readonly {
            warn!("pop rejected: target is readonly");
            return Ok(Value::Undefined);
        }
        let (removed, pending) = self.core.target.with_raw_mut(|raw| {
            let Raw::Array(items) = raw else {
                return (Value::Undefined, None);
            };
            match items.pop() {
                Some(v) => {
                    let new_len = items.len();
                    (v, Some((DepKey::Length, ChangeKind::Set, Some(new_len))))
                }
                None => (Value::Undefined, None),
            }
        });
        self.dispatch(pending);
        Ok(self.wrap_nested(removed))
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Result<Value> {
        let removed = self.splice_impl("shift", 0, 1, Vec::new())?;
        Ok(removed.into_iter().next().unwrap_or_default())
    }

    /// Prepend an element. Returns the new length.
    pub fn unshift(&self, value: impl Into<Value>) -> Result<usize> {
        self.splice_impl("unshift", 0, 0, vec![value.into()])?;
        Ok(self.internal_len())
    }

    /// Replace `delete_count` elements starting at `start` with `items`.
    /// Returns the removed elements.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Result<Vec<Value>> {
        self.splice_impl("splice", start, delete_count, items)
    }

    fn splice_impl(
        &self,
        op: &'static str,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Result<Vec<Value>> {
        self.require_array(op)?;
        if self.core.readonly {
            warn!(op, "mutation rejected: target is readonly");
            return Ok(Vec::new());
        }
        let items: Vec<Value> = items.into_iter().map(Value::into_raw).collect();
        let len = self.internal_len();
        let start = start.min(len);
        let delete_count = delete_count.min(len - start);

        let (removed, pending) = self.core.target.with_raw_mut(|raw| {
            let Raw::Array(arr) = raw else {
                return (Vec::new(), Vec::new());
            };
            let old = arr.clone();
            let removed: Vec<Value> = arr.splice(start..start + delete_count, items).collect();

            // Notify from an old/new diff: moved elements are overwrites,
            // growth past the old end is an addition (which fans out to the
            // length subscribers), shrinkage is a length write (which fans
            // out to the truncated index subscribers).
            let mut pending: Vec<Pending> = Vec::new();
            let common = old.len().min(arr.len());
            for i in 0..common {
                if !old[i].same_value(&arr[i]) {
                    pending.push((DepKey::Index(i), ChangeKind::Set, None));
                }
            }
            for i in old.len()..arr.len() {
                pending.push((DepKey::Index(i), ChangeKind::Add, None));
            }
            if arr.len() < old.len() {
                pending.push((DepKey::Length, ChangeKind::Set, Some(arr.len())));
            }
            (removed, pending)
        });

        self.dispatch(pending);
        Ok(removed.into_iter().map(|v| self.wrap_nested(v)).collect())
    }

    /// Find an element. Wrapped and raw forms of the same record compare
    /// equal, so one scan serves both. Tracks `length` and every visited
    /// index.
    pub fn index_of(&self, needle: &Value) -> Result<Option<usize>> {
        self.require_array("index_of")?;
        let len = self.get(PropKey::Length).as_number().unwrap_or(0.0) as usize;
        for i in 0..len {
            if self.get(i) == *needle {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// [`index_of`](Self::index_of), scanning from the end.
    pub fn last_index_of(&self, needle: &Value) -> Result<Option<usize>> {
        self.require_array("last_index_of")?;
        let len = self.get(PropKey::Length).as_number().unwrap_or(0.0) as usize;
        for i in (0..len).rev() {
            if self.get(i) == *needle {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// Membership by same-value-zero equality.
    pub fn includes(&self, needle: &Value) -> Result<bool> {
        self.require_array("includes")?;
        Ok(self.index_of(needle)?.is_some())
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// Read every reachable property once, purely for its tracking side
    /// effect. Visits each record at most once, so reference cycles
    /// terminate. Used by value-source watchers.
    pub fn traverse(&self) {
        let mut visited = HashSet::new();
        self.traverse_into(&mut visited);
    }

    fn traverse_into(&self, visited: &mut HashSet<TargetId>) {
        if !visited.insert(self.core.target.id()) {
            return;
        }
        match self.kind() {
            TargetKind::Object => {
                for key in self.keys() {
                    let value = self.get(key);
                    Self::traverse_value(value, visited);
                }
            }
            TargetKind::Array => {
                let len = self.get(PropKey::Length).as_number().unwrap_or(0.0) as usize;
                for i in 0..len {
                    Self::traverse_value(self.get(i), visited);
                }
            }
            TargetKind::Map => {
                for (key, value) in self.entries_iter() {
                    Self::traverse_value(key, visited);
                    Self::traverse_value(value, visited);
                }
            }
            TargetKind::Set => {
                for value in self.values_iter() {
                    Self::traverse_value(value, visited);
                }
            }
        }
    }

    fn traverse_value(value: Value, visited: &mut HashSet<TargetId>) {
        match value {
            Value::Obs(o) => o.traverse_into(visited),
            // A shallow wrapper hands back raw references; keep walking
            // through a plain reactive façade so nested reads still track.
            Value::Ref(t) => reactive(t).traverse_into(visited),
            _ => {}
        }
    }
}

impl PartialEq for Observed {
    fn eq(&self, other: &Self) -> bool {
        self.core.target.id() == other.core.target.id()
            && self.core.shallow == other.core.shallow
            && self.core.readonly == other.core.readonly
    }
}

impl Eq for Observed {}

impl fmt::Debug for Observed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observed")
            .field("target", &self.core.target)
            .field("shallow", &self.core.shallow)
            .field("readonly", &self.core.readonly)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
