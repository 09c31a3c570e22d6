//! Dependency Store
//!
//! The subscription graph: a global map from target identity to a per-key
//! set of subscribed computations. Reads enter through [`track`], writes
//! through [`trigger`].
//!
//! # Keys
//!
//! Besides ordinary property keys, three synthetic keys participate:
//!
//! - [`DepKey::Iterate`]: "structural enumeration changed". Joined by
//!   anything that enumerates a record; notified when a key or element is
//!   added or removed (and on map value overwrites, which entry and value
//!   iteration observe).
//! - [`DepKey::KeyIterate`]: "collection key-set changed". Joined only by
//!   map key iteration; a pure value overwrite must not notify it.
//! - [`DepKey::Output`]: the synthetic "value" key of a computed.
//!
//! # Fan-out
//!
//! A single write can implicate several subscriber sets (the key itself,
//! the enumeration tokens, the array `length` key, truncated indices). The
//! union is deduplicated so each computation is notified at most once per
//! trigger, and the computation performing the write is skipped so a
//! self-referential read-then-write never recurses.
//!
//! # Locking
//!
//! Subscriber IDs are snapshotted and resolved to live computations before
//! any of them runs; no user code executes while the store lock is held.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use indexmap::IndexSet;
use parking_lot::RwLock;
use tracing::trace;

use super::context;
use super::effect::{self, ReactorId};
use crate::target::{Target, TargetId, TargetKind};
use crate::value::Value;

/// A dependency-store key: one observable aspect of a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DepKey {
    /// A named property of a plain object.
    Name(Arc<str>),
    /// An element of an array.
    Index(usize),
    /// An array's length.
    Length,
    /// Structural enumeration of a record.
    Iterate,
    /// The key set of a map-like record.
    KeyIterate,
    /// One entry of a map-like or set-like record.
    Entry(Value),
    /// The cached output of a computed value.
    Output,
}

/// How a write changed its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// An existing key's value was overwritten.
    Set,
    /// A key or element was added.
    Add,
    /// A key or element was removed.
    Delete,
}

type KeyDeps = HashMap<DepKey, IndexSet<ReactorId>>;

static DEPS: OnceLock<RwLock<HashMap<TargetId, KeyDeps>>> = OnceLock::new();

fn deps() -> &'static RwLock<HashMap<TargetId, KeyDeps>> {
    DEPS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Record that the active computation depends on `(target, key)`.
///
/// No-op when no computation is active or tracking is paused.
pub(crate) fn track(target: &Target, key: DepKey) {
    track_id(target.id(), key);
}

/// [`track`] for participants that have an identity but no record, i.e.
/// computed values under their synthetic output key.
pub(crate) fn track_orphan(id: TargetId, key: DepKey) {
    track_id(id, key);
}

fn track_id(id: TargetId, key: DepKey) {
    let Some(reactor) = context::record(id, key.clone()) else {
        return;
    };
    trace!(id = id.raw(), ?key, ?reactor, "track");
    deps()
        .write()
        .entry(id)
        .or_default()
        .entry(key)
        .or_default()
        .insert(reactor);
}

/// Notify every computation implicated by a write to `(id, key)`.
///
/// `kind` is the target's record kind (`None` for computed values), and
/// `new_len` carries the new array length for `Length` writes so truncated
/// index subscribers can be found.
pub(crate) fn trigger(
    id: TargetId,
    kind: Option<TargetKind>,
    key: &DepKey,
    change: ChangeKind,
    new_len: Option<usize>,
) {
    let mut implicated: IndexSet<ReactorId> = IndexSet::new();

    {
        let guard = deps().read();
        let Some(keys) = guard.get(&id) else {
            return;
        };

        let extend = |dep: &DepKey, implicated: &mut IndexSet<ReactorId>| {
            if let Some(subs) = keys.get(dep) {
                implicated.extend(subs.iter().copied());
            }
        };

        extend(key, &mut implicated);

        match change {
            ChangeKind::Add | ChangeKind::Delete => {
                extend(&DepKey::Iterate, &mut implicated);
                if kind == Some(TargetKind::Map) {
                    extend(&DepKey::KeyIterate, &mut implicated);
                }
            }
            // Entry and value iteration of a map observes overwrites; key
            // iteration does not.
            ChangeKind::Set => {
                if kind == Some(TargetKind::Map) {
                    extend(&DepKey::Iterate, &mut implicated);
                }
            }
        }

        if kind == Some(TargetKind::Array) {
            // Appending changes the length.
            if change == ChangeKind::Add {
                extend(&DepKey::Length, &mut implicated);
            }
            // Truncation drops every element at or past the new length.
            if *key == DepKey::Length {
                let cutoff = new_len.unwrap_or(usize::MAX);
                for (dep, subs) in keys.iter() {
                    if let DepKey::Index(i) = dep {
                        if *i >= cutoff {
                            implicated.extend(subs.iter().copied());
                        }
                    }
                }
            }
        }
    }

    // A computation must not re-trigger itself from its own write.
    if let Some(active) = context::active_reactor() {
        implicated.shift_remove(&active);
    }

    if implicated.is_empty() {
        return;
    }
    trace!(id = id.raw(), ?key, ?change, count = implicated.len(), "trigger");

    // Resolve before dispatch; a notified computation may re-enter the
    // store (cleanup, re-tracking, further triggers).
    for reactor in effect::resolve(&implicated) {
        reactor.notify();
    }
}

/// Remove `reactor` from every dependency set in `locations`.
///
/// Called before each re-run (dynamic dependency re-binding) and when a
/// computation is dropped. Sets and target entries left empty are removed.
pub(crate) fn remove_reactor(locations: &[(TargetId, DepKey)], reactor: ReactorId) {
    if locations.is_empty() {
        return;
    }
    // Entry keys can hold the last handle to a target; drop them after the
    // lock is released, since dropping a target re-enters the store.
    let mut dropped: Vec<DepKey> = Vec::new();
    {
        let mut guard = deps().write();
        for (id, key) in locations {
            let Some(keys) = guard.get_mut(id) else {
                continue;
            };
            if let Some(set) = keys.get_mut(key) {
                set.shift_remove(&reactor);
                if set.is_empty() {
                    if let Some((removed, _)) = keys.remove_entry(key) {
                        dropped.push(removed);
                    }
                    if keys.is_empty() {
                        guard.remove(id);
                    }
                }
            }
        }
    }
    drop(dropped);
}

/// Evict a target's whole subscription entry. Called when the target's
/// record drops and when a computed value is dropped.
pub(crate) fn drop_target(id: TargetId) {
    let removed = deps().write().remove(&id);
    // Dropped outside the lock; see `remove_reactor`.
    drop(removed);
}

#[cfg(test)]
pub(crate) fn subscriber_count(id: TargetId, key: &DepKey) -> usize {
    deps()
        .read()
        .get(&id)
        .and_then(|keys| keys.get(key))
        .map(|set| set.len())
        .unwrap_or(0)
}

#[cfg(test)]
pub(crate) fn has_entry(id: TargetId) -> bool {
    deps().read().contains_key(&id)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
