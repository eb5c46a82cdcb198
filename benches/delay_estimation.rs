//! Benchmarks for cross-correlation delay estimation
//!
//! Compares a fresh estimator per call (plans rebuilt every time) against a
//! reused estimator with cached plans, across transform lengths used by the
//! pulse aligner and the calibration scan.
//!
//! Platform: Cross-platform (synthetic signals, CI-safe)

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use qsync::align::{DelayEstimator, estimate_delay};
use qsync::test_utils::{pulse_train, shifted};
use std::hint::black_box;

fn signals(len: usize) -> (Vec<f32>, Vec<f32>) {
    let reference = pulse_train(len, &[len / 4, len / 2]);
    let delayed = shifted(&reference, len / 16);
    (reference, delayed)
}

fn bench_estimate(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_delay");

    for n in [1024usize, 8192, 65536] {
        let (a, b) = signals(n / 2);
        group.throughput(Throughput::Elements(n as u64));

        group.bench_with_input(BenchmarkId::new("fresh_plans", n), &n, |bench, &n| {
            bench.iter(|| black_box(estimate_delay(black_box(&a), black_box(&b), n).unwrap()))
        });

        let mut estimator = DelayEstimator::new();
        group.bench_with_input(BenchmarkId::new("cached_plans", n), &n, |bench, &n| {
            bench.iter(|| black_box(estimator.estimate(black_box(&a), black_box(&b), n).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_estimate);
criterion_main!(benches);
