//! Integration Tests for the Reactive Engine
//!
//! These tests verify the end-to-end behavior of observation wrappers,
//! effects, computed values, watchers, and the job scheduler working
//! together.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use weft_core::reactive::{
    batch, computed, flush_jobs, reactive, Effect, Flush, PropKey, WatchOptions,
};
use weft_core::reactive::{watch, watch_value};
use weft_core::{Target, Value};

/// A computation reading `cond ? a : b` re-binds its dependencies when the
/// condition flips: the branch no longer read stops triggering it, the
/// newly read branch starts.
#[test]
fn dynamic_dependency_rebinding() {
    let state = reactive(Target::object_from([("cond", true)]));
    state.set("a", 1).unwrap();
    state.set("b", 2).unwrap();

    let runs = Arc::new(AtomicI32::new(0));
    let runs_clone = runs.clone();
    let reader = state.clone();
    let _effect = Effect::new(move || {
        let branch = if reader.get("cond").as_bool().unwrap_or(false) {
            "a"
        } else {
            "b"
        };
        let _ = reader.get(branch);
        runs_clone.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // While cond is true, `b` is unread.
    state.set("b", 20).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    state.set("a", 10).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    state.set("cond", false).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    // Now `a` is the unread branch.
    state.set("a", 100).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    state.set("b", 200).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 4);
}

/// A computation that reads and writes the same property executes once per
/// external trigger, never recursing into itself.
#[test]
fn no_self_trigger() {
    let state = reactive(Target::object_from([("n", 0)]));

    let runs = Arc::new(AtomicI32::new(0));
    let runs_clone = runs.clone();
    let worker = state.clone();
    let _effect = Effect::new(move || {
        runs_clone.fetch_add(1, Ordering::SeqCst);
        let n = worker.get("n").as_number().unwrap_or(0.0);
        worker.set("n", n + 1.0).unwrap();
    });
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(state.get("n").as_number(), Some(1.0));

    // One external write, one re-run.
    state.set("n", 10).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(state.get("n").as_number(), Some(11.0));
}

/// Assigning NaN over NaN is not a change.
#[test]
fn nan_stability() {
    let state = reactive(Target::object_from([("x", f64::NAN)]));

    let runs = Arc::new(AtomicI32::new(0));
    let runs_clone = runs.clone();
    let reader = state.clone();
    let _effect = Effect::new(move || {
        let _ = reader.get("x");
        runs_clone.fetch_add(1, Ordering::SeqCst);
    });

    state.set("x", f64::NAN).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    state.set("x", 1).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Enumeration re-runs on structural changes only, not value overwrites.
#[test]
fn structural_vs_value_change() {
    let state = reactive(Target::object_from([("a", 1)]));

    let key_lists: Arc<Mutex<Vec<Vec<PropKey>>>> = Arc::new(Mutex::new(Vec::new()));
    let key_lists_clone = key_lists.clone();
    let reader = state.clone();
    let _effect = Effect::new(move || {
        key_lists_clone.lock().push(reader.keys());
    });
    assert_eq!(key_lists.lock().len(), 1);

    state.set("a", 2).unwrap();
    assert_eq!(key_lists.lock().len(), 1);

    state.set("b", 2).unwrap();
    assert_eq!(key_lists.lock().len(), 2);
    assert_eq!(key_lists.lock().last().unwrap().len(), 2);

    state.delete("b").unwrap();
    assert_eq!(key_lists.lock().len(), 3);
    assert_eq!(key_lists.lock().last().unwrap().len(), 1);
}

/// Truncating an array re-runs readers of dropped indices exactly once and
/// leaves readers of surviving indices alone.
#[test]
fn array_truncation() {
    let arr = reactive(Target::array_from([0, 1, 2, 3]));

    let tail_runs = Arc::new(AtomicI32::new(0));
    let tail_clone = tail_runs.clone();
    let tail_reader = arr.clone();
    let _tail = Effect::new(move || {
        let _ = tail_reader.get(3usize);
        tail_clone.fetch_add(1, Ordering::SeqCst);
    });

    let head_runs = Arc::new(AtomicI32::new(0));
    let head_clone = head_runs.clone();
    let head_reader = arr.clone();
    let _head = Effect::new(move || {
        let _ = head_reader.get(0usize);
        head_clone.fetch_add(1, Ordering::SeqCst);
    });

    arr.set(PropKey::Length, 2).unwrap();
    assert_eq!(tail_runs.load(Ordering::SeqCst), 2);
    assert_eq!(head_runs.load(Ordering::SeqCst), 1);
    assert_eq!(arr.len(), 2);
}

/// A computed does not evaluate until first read, and repeated reads
/// without intervening writes evaluate the getter exactly once.
#[test]
fn computed_laziness_and_caching() {
    let state = reactive(Target::object_from([("x", 1), ("y", 2)]));

    let evals = Arc::new(AtomicI32::new(0));
    let evals_clone = evals.clone();
    let source = state.clone();
    let sum = computed(move || {
        evals_clone.fetch_add(1, Ordering::SeqCst);
        source.get("x").as_number().unwrap_or(0.0) + source.get("y").as_number().unwrap_or(0.0)
    });
    assert_eq!(evals.load(Ordering::SeqCst), 0);

    assert_eq!(sum.get(), 3.0);
    assert_eq!(sum.get(), 3.0);
    assert_eq!(evals.load(Ordering::SeqCst), 1);

    state.set("y", 9).unwrap();
    assert_eq!(evals.load(Ordering::SeqCst), 1);
    assert_eq!(sum.get(), 10.0);
    assert_eq!(evals.load(Ordering::SeqCst), 2);
}

/// Three synchronous writes observed by a post-flush watcher produce one
/// callback with the settled value.
#[test]
fn batched_scheduling() {
    let state = reactive(Target::object_from([("n", 0)]));

    let calls: Arc<Mutex<Vec<(f64, Option<f64>)>>> = Arc::new(Mutex::new(Vec::new()));
    let calls_clone = calls.clone();
    let source = state.clone();
    let _watcher = watch(
        move || source.get("n").as_number().unwrap_or(0.0),
        move |new, old, _| {
            calls_clone.lock().push((*new, old.copied()));
        },
        WatchOptions {
            immediate: false,
            flush: Flush::Post,
        },
    );

    batch(|| {
        state.set("n", 1).unwrap();
        state.set("n", 2).unwrap();
        state.set("n", 3).unwrap();
    });
    assert_eq!(calls.lock().as_slice(), &[(3.0, Some(0.0))]);
}

/// Key-only iteration of a map ignores value overwrites but observes
/// additions and removals.
#[test]
fn collection_key_set_vs_value_distinction() {
    let map = reactive(Target::map_from([("a", 1)]));

    let runs = Arc::new(AtomicI32::new(0));
    let runs_clone = runs.clone();
    let reader = map.clone();
    let _effect = Effect::new(move || {
        let _ = reader.keys_iter();
        runs_clone.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    map.insert("a", 2).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    map.insert("b", 1).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    map.remove("a").unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

/// A full pipeline: observed state feeding a computed feeding a deep
/// watcher, with nested records mutated in place.
#[test]
fn state_computed_watcher_pipeline() {
    let profile = Target::object_from([("name", "ada")]);
    let state = reactive(Target::object_from([
        ("profile", Value::Ref(profile)),
        ("visits", Value::from(0)),
    ]));

    let source = state.clone();
    let summary = computed(move || {
        let name = source
            .get("profile")
            .as_observed()
            .map(|p| p.get("name").as_str().unwrap_or("?").to_string())
            .unwrap_or_default();
        let visits = source.get("visits").as_number().unwrap_or(0.0);
        format!("{name}:{visits}")
    });

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let summary_reader = summary.clone();
    let _watcher = watch(
        move || summary_reader.get(),
        move |new, _, _| {
            seen_clone.lock().push(new.clone());
        },
        WatchOptions {
            immediate: true,
            ..WatchOptions::default()
        },
    );
    assert_eq!(seen.lock().as_slice(), &["ada:0".to_string()]);

    state.set("visits", 1).unwrap();
    let nested = state.get("profile");
    let nested = nested.as_observed().expect("wrapped profile").clone();
    nested.set("name", "grace").unwrap();

    assert_eq!(
        seen.lock().as_slice(),
        &["ada:0".to_string(), "ada:1".to_string(), "grace:1".to_string()]
    );
}

/// Deep watching sees nested mutation anywhere in the record graph, with
/// invalidation cleanup running before the next callback.
#[test]
fn deep_watch_with_invalidation() {
    let inner = Target::object_from([("x", 0)]);
    let root = reactive(Target::object_from([("inner", inner)]));

    let cancelled = Arc::new(AtomicBool::new(false));
    let cancelled_clone = cancelled.clone();
    let fires = Arc::new(AtomicI32::new(0));
    let fires_clone = fires.clone();
    let _watcher = watch_value(
        &root,
        move |_, _, on_invalidate| {
            fires_clone.fetch_add(1, Ordering::SeqCst);
            let flag = cancelled_clone.clone();
            on_invalidate.register(move || flag.store(true, Ordering::SeqCst));
        },
        WatchOptions::default(),
    );

    let nested = root.get("inner");
    let nested = nested.as_observed().expect("wrapped inner").clone();

    nested.set("x", 1).unwrap();
    assert_eq!(fires.load(Ordering::SeqCst), 1);
    assert!(!cancelled.load(Ordering::SeqCst));

    nested.set("x", 2).unwrap();
    assert_eq!(fires.load(Ordering::SeqCst), 2);
    assert!(cancelled.load(Ordering::SeqCst));
}

/// Deferred effects settle once per flush even across several records.
#[test]
fn flush_is_idempotent_when_empty() {
    let state = reactive(Target::object_from([("n", 0)]));
    state.set("n", 1).unwrap();
    // No deferred subscribers; flushing is a harmless no-op.
    flush_jobs();
    flush_jobs();
    assert_eq!(state.get("n").as_number(), Some(1.0));
}
