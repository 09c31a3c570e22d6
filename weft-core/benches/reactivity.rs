//! Reactivity benchmarks: tracking overhead on reads, trigger fan-out on
//! writes, and computed cache hits.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use weft_core::reactive::{computed, flush_jobs, reactive, Effect, EffectOptions};
use weft_core::Target;

fn bench_tracked_reads(c: &mut Criterion) {
    let state = reactive(Target::object_from([("n", 1)]));

    c.bench_function("untracked_read", |b| {
        b.iter(|| black_box(state.get("n")));
    });

    c.bench_function("tracked_read", |b| {
        let reader = state.clone();
        let effect = Effect::with_options(
            move || {
                black_box(reader.get("n"));
            },
            EffectOptions {
                lazy: true,
                scheduler: None,
            },
        );
        b.iter(|| effect.run());
    });
}

fn bench_trigger_fan_out(c: &mut Criterion) {
    let state = reactive(Target::object_from([("n", 0)]));
    let mut effects = Vec::new();
    for _ in 0..100 {
        let reader = state.clone();
        effects.push(Effect::new(move || {
            black_box(reader.get("n"));
        }));
    }

    let mut n = 0i64;
    c.bench_function("write_fan_out_100", |b| {
        b.iter(|| {
            n += 1;
            state.set("n", n).unwrap();
        });
    });
    drop(effects);
}

fn bench_computed_cache_hit(c: &mut Criterion) {
    let state = reactive(Target::object_from([("x", 1), ("y", 2)]));
    let source = state.clone();
    let sum = computed(move || {
        source.get("x").as_number().unwrap_or(0.0) + source.get("y").as_number().unwrap_or(0.0)
    });
    let _ = sum.get();

    c.bench_function("computed_cache_hit", |b| {
        b.iter(|| black_box(sum.get()));
    });
}

fn bench_deferred_batch(c: &mut Criterion) {
    let state = reactive(Target::object_from([("n", 0)]));
    let reader = state.clone();
    let _effect = Effect::with_options(
        move || {
            black_box(reader.get("n"));
        },
        EffectOptions {
            lazy: false,
            scheduler: Some(weft_core::reactive::deferred()),
        },
    );

    let mut n = 0i64;
    c.bench_function("deferred_burst_10_flush", |b| {
        b.iter(|| {
            for _ in 0..10 {
                n += 1;
                state.set("n", n).unwrap();
            }
            flush_jobs();
        });
    });
}

criterion_group!(
    benches,
    bench_tracked_reads,
    bench_trigger_fan_out,
    bench_computed_cache_hit,
    bench_deferred_batch
);
criterion_main!(benches);
