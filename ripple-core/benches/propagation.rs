//! Propagation benchmarks
//!
//! Measures the cost of a settle cycle for common graph shapes: a long
//! chain of computed nodes, a wide fan-out of reactions and a batch of
//! writes to many cells.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ripple_core::{Cell, Computed, Engine, Reaction};

// =============================================================================
// Graph Construction
// =============================================================================

fn build_chain(engine: &Engine, depth: usize) -> (Cell<u64>, Computed<u64>, Reaction) {
    let root = engine.cell(0u64);
    let source = root.clone();
    let mut tail = engine.computed(move || source.get() + 1);
    for _ in 1..depth {
        let previous = tail.clone();
        tail = Computed::try_new(engine, move || Ok(previous.get()? + 1));
    }
    let observed = tail.clone();
    let reaction = engine.autorun(move || {
        black_box(observed.get()?);
        Ok(())
    });
    (root, tail, reaction)
}

fn build_fan_out(engine: &Engine, width: usize) -> (Cell<u64>, Vec<Reaction>) {
    let root = engine.cell(0u64);
    let reactions = (0..width)
        .map(|_| {
            let source = root.clone();
            engine.autorun(move || {
                black_box(source.get());
                Ok(())
            })
        })
        .collect();
    (root, reactions)
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("computed_chain");

    for depth in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let engine = Engine::new();
            let (root, _tail, _reaction) = build_chain(&engine, depth);
            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                root.set(black_box(next)).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("reaction_fan_out");

    for width in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(width as u64));
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            let engine = Engine::new();
            let (root, _reactions) = build_fan_out(&engine, width);
            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                root.set(black_box(next)).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_batched_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("batched_writes");

    for cells in [10usize, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(cells), &cells, |b, &count| {
            let engine = Engine::new();
            let inputs: Vec<Cell<u64>> = (0..count).map(|_| engine.cell(0u64)).collect();
            let sources = inputs.clone();
            let total = engine.computed(move || sources.iter().map(Cell::get).sum::<u64>());
            let _reaction = engine.autorun(move || {
                black_box(total.get()?);
                Ok(())
            });

            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                engine.transaction(|| {
                    for cell in &inputs {
                        cell.set(next).unwrap();
                    }
                });
            });
        });
    }

    group.finish();
}

fn bench_unchanged_suppression(c: &mut Criterion) {
    c.bench_function("parity_suppression", |b| {
        let engine = Engine::new();
        let root = engine.cell(0u64);
        let source = root.clone();
        let parity = engine.computed(move || source.get() % 2);
        let (_tail, _reaction) = {
            let upstream = parity.clone();
            let label = Computed::try_new(&engine, move || Ok(upstream.get()? == 0));
            let observed = label.clone();
            let reaction = engine.autorun(move || {
                black_box(observed.get()?);
                Ok(())
            });
            (label, reaction)
        };

        let mut next = 0u64;
        b.iter(|| {
            next += 2;
            root.set(black_box(next)).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_chain,
    bench_fan_out,
    bench_batched_writes,
    bench_unchanged_suppression
);
criterion_main!(benches);
