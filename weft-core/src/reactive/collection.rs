//! Collection Adapter
//!
//! Maps and sets are not mutated through property writes; they change
//! through their own methods. This module gives [`Observed`] wrappers over
//! map and set targets an instrumented method surface:
//!
//! - per-entry reads track [`DepKey::Entry`] keys,
//! - iteration tracks the enumeration token, and map key iteration tracks
//!   the narrower key-set token, so a pure value overwrite re-runs entry
//!   and value iterators but not key iterators,
//! - mutators classify the change (add, overwrite, delete) and notify on
//!   the wrapper's own target, so subscriptions made through the wrapper
//!   are the ones that fire.
//!
//! Keys are [`Value`]s under same-value-zero equality, so a wrapped record
//! and its raw reference address the same entry.

use tracing::warn;

use super::observe::{Observed, Pending};
use super::store::{ChangeKind, DepKey};
use crate::error::{Error, Result};
use crate::target::{Raw, TargetKind};
use crate::value::Value;

impl Observed {
    fn require_map(&self, op: &'static str) -> Result<()> {
        match self.kind() {
            TargetKind::Map => Ok(()),
            kind => Err(Error::UnsupportedOp { op, kind }),
        }
    }

    fn require_collection(&self, op: &'static str) -> Result<()> {
        let kind = self.kind();
        if kind.is_collection() {
            Ok(())
        } else {
            Err(Error::UnsupportedOp { op, kind })
        }
    }

    /// Read a map entry. A miss reads as [`Value::Undefined`] and is still
    /// tracked under the entry key.
    pub fn entry(&self, key: impl Into<Value>) -> Value {
        if self.kind() != TargetKind::Map {
            warn!(kind = ?self.kind(), "entry read on a non-map target");
            return Value::Undefined;
        }
        let key = key.into().into_raw();
        self.track(DepKey::Entry(key.clone()));
        let value = self.target().with_raw(|raw| match raw {
            Raw::Map(map) => map.get(&key).cloned().unwrap_or_default(),
            _ => Value::Undefined,
        });
        self.wrap_nested(value)
    }

    /// Write a map entry, classifying the write as an addition or an
    /// overwrite. Overwriting an entry with a same-value-zero equal value
    /// notifies nothing.
    pub fn insert(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        self.require_map("insert")?;
        let key = key.into().into_raw();
        if self.is_readonly() {
            warn!(?key, "insert rejected: target is readonly");
            return Ok(());
        }
        let value = value.into().into_raw();

        let pending: Option<Pending> = self.target().with_raw_mut(|raw| {
            let Raw::Map(map) = raw else { return None };
            match map.insert(key.clone(), value.clone()) {
                None => Some((DepKey::Entry(key.clone()), ChangeKind::Add, None)),
                Some(old) if !old.same_value(&value) => {
                    Some((DepKey::Entry(key.clone()), ChangeKind::Set, None))
                }
                Some(_) => None,
            }
        });
        self.dispatch(pending);
        Ok(())
    }

    /// Add an element to a set. Returns whether the element was newly
    /// added; adding a present element notifies nothing.
    pub fn add(&self, value: impl Into<Value>) -> Result<bool> {
        match self.kind() {
            TargetKind::Set => {}
            kind => return Err(Error::UnsupportedOp { op: "add", kind }),
        }
        let value = value.into().into_raw();
        if self.is_readonly() {
            warn!("add rejected: target is readonly");
            return Ok(false);
        }

        let added = self.target().with_raw_mut(|raw| match raw {
            Raw::Set(set) => set.insert(value.clone()),
            _ => false,
        });
        if added {
            self.dispatch([(DepKey::Entry(value), ChangeKind::Add, None)]);
        }
        Ok(added)
    }

    /// Remove a map entry or set element. Returns whether it existed;
    /// removing an absent one notifies nothing.
    pub fn remove(&self, key: impl Into<Value>) -> Result<bool> {
        self.require_collection("remove")?;
        let key = key.into().into_raw();
        if self.is_readonly() {
            warn!(?key, "remove rejected: target is readonly");
            return Ok(false);
        }

        // The removed value is returned out of the closure so it drops
        // after the storage lock is released.
        let removed = self.target().with_raw_mut(|raw| match raw {
            Raw::Map(map) => map.shift_remove(&key),
            Raw::Set(set) => set.shift_remove(&key).then_some(Value::Undefined),
            _ => None,
        });
        let existed = removed.is_some();
        if existed {
            self.dispatch([(DepKey::Entry(key), ChangeKind::Delete, None)]);
        }
        Ok(existed)
    }

    /// Membership test, tracked under the entry key.
    pub fn contains(&self, key: impl Into<Value>) -> bool {
        if !self.kind().is_collection() {
            warn!(kind = ?self.kind(), "contains on a non-collection target; use has");
            return false;
        }
        let key = key.into().into_raw();
        self.track(DepKey::Entry(key.clone()));
        self.target().with_raw(|raw| match raw {
            Raw::Map(map) => map.contains_key(&key),
            Raw::Set(set) => set.contains(&key),
            _ => false,
        })
    }

    /// Remove every entry or element. Notifies each removed entry as a
    /// structural delete.
    pub fn clear(&self) -> Result<()> {
        self.require_collection("clear")?;
        if self.is_readonly() {
            warn!("clear rejected: target is readonly");
            return Ok(());
        }

        // Drained entries drop after dispatch; they may hold record handles.
        let (drained, pending) = self.target().with_raw_mut(|raw| match raw {
            Raw::Map(map) => {
                let drained: Vec<(Value, Value)> = map.drain(..).collect();
                let pending: Vec<Pending> = drained
                    .iter()
                    .map(|(k, _)| (DepKey::Entry(k.clone()), ChangeKind::Delete, None))
                    .collect();
                (drained, pending)
            }
            Raw::Set(set) => {
                let drained: Vec<Value> = set.drain(..).collect();
                let pending: Vec<Pending> = drained
                    .iter()
                    .map(|v| (DepKey::Entry(v.clone()), ChangeKind::Delete, None))
                    .collect();
                let drained = drained.into_iter().map(|v| (v, Value::Undefined)).collect();
                (drained, pending)
            }
            _ => (Vec::new(), Vec::new()),
        });
        self.dispatch(pending);
        drop(drained);
        Ok(())
    }

    /// Snapshot the keys. Map key iteration tracks the key-set token, so
    /// it re-runs on additions and deletions but not on value overwrites.
    /// Set keys are its values.
    pub fn keys_iter(&self) -> Vec<Value> {
        match self.kind() {
            TargetKind::Map => {
                self.track(DepKey::KeyIterate);
                let keys: Vec<Value> = self.target().with_raw(|raw| match raw {
                    Raw::Map(map) => map.keys().cloned().collect(),
                    _ => Vec::new(),
                });
                keys.into_iter().map(|k| self.wrap_nested(k)).collect()
            }
            TargetKind::Set => self.values_iter(),
            kind => {
                warn!(?kind, "key iteration on a non-collection target; use keys");
                Vec::new()
            }
        }
    }

    /// Snapshot the values, tracked under the enumeration token.
    pub fn values_iter(&self) -> Vec<Value> {
        if !self.kind().is_collection() {
            warn!(kind = ?self.kind(), "value iteration on a non-collection target");
            return Vec::new();
        }
        self.track(DepKey::Iterate);
        let values: Vec<Value> = self.target().with_raw(|raw| match raw {
            Raw::Map(map) => map.values().cloned().collect(),
            Raw::Set(set) => set.iter().cloned().collect(),
            _ => Vec::new(),
        });
        values.into_iter().map(|v| self.wrap_nested(v)).collect()
    }

    /// Snapshot `(key, value)` pairs, tracked under the enumeration token.
    /// For a set, key and value are the same element.
    pub fn entries_iter(&self) -> Vec<(Value, Value)> {
        if !self.kind().is_collection() {
            warn!(kind = ?self.kind(), "entry iteration on a non-collection target; use entries");
            return Vec::new();
        }
        self.track(DepKey::Iterate);
        let pairs: Vec<(Value, Value)> = self.target().with_raw(|raw| match raw {
            Raw::Map(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Raw::Set(set) => set.iter().map(|v| (v.clone(), v.clone())).collect(),
            _ => Vec::new(),
        });
        pairs
            .into_iter()
            .map(|(k, v)| (self.wrap_nested(k), self.wrap_nested(v)))
            .collect()
    }

    /// Visit every `(value, key)` pair, tracked under the enumeration
    /// token.
    pub fn for_each(&self, mut f: impl FnMut(Value, Value)) {
        for (key, value) in self.entries_iter() {
            f(value, key);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
