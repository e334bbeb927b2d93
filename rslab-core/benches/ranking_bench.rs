//! Criterion benchmarks for the ranking and merge hot paths.
//!
//! Benchmarks:
//! 1. Full ranking over a synthetic universe
//! 2. Percentile assignment alone
//! 3. Single-bar merge into a capped series

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rslab_core::domain::{Bar, BarSeries, Timeframe};
use rslab_core::ranking::{assign_percentiles, RankingEngine};

const DAY_MS: i64 = 86_400_000;

// ── Helpers ──────────────────────────────────────────────────────────

fn make_series(symbol: &str, seed: usize, n: usize) -> BarSeries {
    let bars = (0..n)
        .map(|i| {
            let close = 100.0 + ((i + seed) as f64 * 0.05).sin() * 10.0 + seed as f64 * 0.01;
            Bar::new(
                i as i64 * DAY_MS,
                close - 0.3,
                close + 1.5,
                close - 1.5,
                close,
                1_000_000 + (i as u64 % 500_000),
            )
            .unwrap()
        })
        .collect();
    BarSeries::from_bars(symbol, Timeframe::Daily, bars).unwrap()
}

fn make_universe(size: usize) -> Vec<BarSeries> {
    (0..size)
        .map(|i| make_series(&format!("S{i:04}"), i, 400))
        .collect()
}

// ── 1. Ranking ───────────────────────────────────────────────────────

fn bench_rank(c: &mut Criterion) {
    let mut group = c.benchmark_group("rank");
    let engine = RankingEngine::default();
    for size in [100usize, 1_000, 5_000] {
        let universe = make_universe(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &universe, |b, u| {
            b.iter(|| engine.rank(black_box(u), None))
        });
    }
    group.finish();
}

// ── 2. Percentiles ───────────────────────────────────────────────────

fn bench_percentiles(c: &mut Criterion) {
    let scored: Vec<(String, f64)> = (0..5_000)
        .map(|i| (format!("S{i:04}"), ((i * 7919) % 1_000) as f64 / 100.0))
        .collect();
    c.bench_function("assign_percentiles_5000", |b| {
        b.iter(|| assign_percentiles(black_box(scored.clone())))
    });
}

// ── 3. Merge ─────────────────────────────────────────────────────────

fn bench_merge(c: &mut Criterion) {
    let series = make_series("AAPL", 0, 400);
    let next = Bar::new(400 * DAY_MS, 1.0, 1.0, 1.0, 1.0, 1).unwrap();
    let correction = Bar::new(200 * DAY_MS, 1.0, 1.0, 1.0, 1.0, 1).unwrap();

    c.bench_function("merge_append_at_cap", |b| {
        b.iter(|| {
            let mut s = series.clone();
            s.merge(black_box(next), 400)
        })
    });
    c.bench_function("merge_replace", |b| {
        b.iter(|| {
            let mut s = series.clone();
            s.merge(black_box(correction), 400)
        })
    });
}

criterion_group!(benches, bench_rank, bench_percentiles, bench_merge);
criterion_main!(benches);
