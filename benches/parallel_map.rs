use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use fanmap::{ParallelExecutor, Parallelism};
use rayon::prelude::*;
use std::hint::black_box;

/// Small CPU-bound transform so dispatch overhead stays visible
fn checksum(seed: u64) -> u64 {
    let mut x = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    for _ in 0..64 {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
    }
    x
}

fn bench_entry_points(c: &mut Criterion) {
    let executor = ParallelExecutor::new(Parallelism::AUTO);
    let mut group = c.benchmark_group("parallel_map");

    for size in [1_000u64, 100_000] {
        let input: Vec<u64> = (0..size).collect();
        group.throughput(Throughput::Elements(size));

        group.bench_with_input(BenchmarkId::new("stream_map", size), &input, |b, input| {
            b.iter(|| {
                let results = executor.stream_map(checksum, input.clone()).unwrap();
                black_box(results.fold(0u64, |acc, x| acc ^ x))
            })
        });

        group.bench_with_input(BenchmarkId::new("batch_map", size), &input, |b, input| {
            b.iter(|| {
                let results = executor.batch_map(checksum, input.clone()).unwrap();
                black_box(results.fold(0u64, |acc, x| acc ^ x))
            })
        });

        group.bench_with_input(BenchmarkId::new("scoped_batch_map", size), &input, |b, input| {
            b.iter(|| {
                let mut acc = 0u64;
                executor
                    .scoped_batch_map(input, |x| checksum(*x), |x| acc ^= x)
                    .unwrap();
                black_box(acc)
            })
        });

        // Work-stealing baseline
        group.bench_with_input(BenchmarkId::new("rayon", size), &input, |b, input| {
            b.iter(|| black_box(input.par_iter().map(|x| checksum(*x)).reduce(|| 0, |a, b| a ^ b)))
        });
    }

    group.finish();
}

fn bench_output_capacity(c: &mut Criterion) {
    let input: Vec<u64> = (0..50_000).collect();
    let mut group = c.benchmark_group("output_capacity");

    for capacity in [0usize, 64, 1024] {
        let executor = ParallelExecutor::new(Parallelism::AUTO).with_output_capacity(capacity);
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &input, |b, input| {
            b.iter(|| {
                let results = executor.batch_map(checksum, input.clone()).unwrap();
                black_box(results.count())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_entry_points, bench_output_capacity);
criterion_main!(benches);
