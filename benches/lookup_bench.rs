use context_extensions::{ContextHandle, ContextRegistry, KeySpace};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::time::Duration;

fn h(addr: usize) -> ContextHandle {
    ContextHandle::from_addr(addr).unwrap()
}

// Same context every time: the thread-cache fast path.
fn bench_get_same_context(c: &mut Criterion) {
    c.bench_function("registry::get_same_context", |b| {
        let registry = ContextRegistry::new();
        let keys = KeySpace::new();
        let k = keys.register::<u64>();
        let _state = registry.create_state(h(0x1000), [k.factory(|_| 7u64)]);
        b.iter(|| {
            let block = registry.get_state(black_box(h(0x1000)));
            black_box(block.get(&k).copied())
        })
    });
}

// Two contexts in turn: every lookup misses and takes the lock.
fn bench_get_alternating_contexts(c: &mut Criterion) {
    c.bench_function("registry::get_alternating_contexts", |b| {
        let registry = ContextRegistry::new();
        let _a = registry.create_state(h(0x1000), Vec::new());
        let _b = registry.create_state(h(0x2000), Vec::new());
        let mut flip = false;
        b.iter(|| {
            flip = !flip;
            let addr = if flip { 0x1000 } else { 0x2000 };
            black_box(registry.get_state(h(addr)))
        })
    });
}

// Creation and teardown with a handful of extensions installed.
fn bench_create_destroy(c: &mut Criterion) {
    c.bench_function("registry::create_destroy_8_extensions", |b| {
        let registry = ContextRegistry::new();
        let keys = KeySpace::new();
        let ks: Vec<_> = (0..8).map(|_| keys.register::<Vec<u8>>()).collect();
        b.iter_batched(
            || ks.iter().map(|k| k.factory(|_| vec![0u8; 64])).collect::<Vec<_>>(),
            |factories| {
                let state = registry.create_state(h(0x3000), factories);
                black_box(state.slot_count());
                state.destroy();
            },
            BatchSize::SmallInput,
        )
    });
}

// One long-lived context read from several threads at once.
fn bench_get_contended(c: &mut Criterion) {
    c.bench_function("registry::get_4_threads_x_10k", |b| {
        let registry = ContextRegistry::new();
        let _state = registry.create_state(h(0x4000), Vec::new());
        b.iter(|| {
            std::thread::scope(|s| {
                for _ in 0..4 {
                    s.spawn(|| {
                        for _ in 0..10_000 {
                            black_box(registry.get_state(h(0x4000)));
                        }
                    });
                }
            })
        })
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(20)
        .measurement_time(Duration::from_secs(3))
        .warm_up_time(Duration::from_secs(1))
}

criterion_group! {
    name = benches;
    config = bench_config();
    targets = bench_get_same_context,
              bench_get_alternating_contexts,
              bench_create_destroy,
              bench_get_contended
}
criterion_main!(benches);
