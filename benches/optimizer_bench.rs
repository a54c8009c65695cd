//! Performance benchmarks for ranking and weight optimization.
//!
//! Run with: cargo bench

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sharpefolio::data::{InMemoryProvider, PriceMatrix};
use sharpefolio::metrics;
use sharpefolio::optimizer::{OptimizerConfig, WeightOptimizer};
use sharpefolio::ranker::SectorRanker;
use sharpefolio::types::PriceSeries;

/// Generate a synthetic close series for benchmarking.
fn generate_closes(count: usize, drift: f64, phase: f64) -> Vec<f64> {
    let mut price = 100.0;
    (0..count)
        .map(|i| {
            let noise = ((i as f64 * 0.7 + phase).sin() * 2.0 + (i as f64 * 1.3).cos()) * 0.5;
            price += drift * price + noise;
            price.max(50.0)
        })
        .collect()
}

fn generate_series(k: usize, count: usize) -> Vec<PriceSeries> {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    (0..k)
        .map(|i| {
            PriceSeries::from_closes(
                format!("S{}", i),
                start,
                &generate_closes(count, 0.0005 * (i + 1) as f64, i as f64),
            )
        })
        .collect()
}

fn bench_metrics(c: &mut Criterion) {
    let closes = generate_closes(1000, 0.001, 0.0);
    let mut group = c.benchmark_group("metrics");
    group.bench_function("sharpe_1000", |b| {
        b.iter(|| metrics::sharpe(black_box(&closes), 0.04))
    });
    group.bench_function("max_drawdown_1000", |b| {
        b.iter(|| metrics::max_drawdown(black_box(&closes)))
    });
    group.finish();
}

fn bench_optimizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimizer");
    let optimizer = WeightOptimizer::new(OptimizerConfig {
        timeout: None,
        ..OptimizerConfig::default()
    });

    for k in [2, 5, 10].iter() {
        let matrix = PriceMatrix::from_series(&generate_series(*k, 21));
        group.bench_with_input(BenchmarkId::new("sector", k), &matrix, |b, matrix| {
            b.iter(|| optimizer.optimize("bench", black_box(matrix), 100_000.0))
        });
    }
    group.finish();
}

fn bench_ranking(c: &mut Criterion) {
    let series = generate_series(50, 150);
    let symbols: Vec<String> = series.iter().map(|s| s.symbol().to_string()).collect();
    let mut provider = InMemoryProvider::new();
    for s in series {
        provider.insert(s);
    }

    let mut group = c.benchmark_group("ranking");
    for parallel in [false, true] {
        let ranker = SectorRanker::new(100).with_parallel(parallel);
        group.bench_with_input(
            BenchmarkId::new("sector_50", if parallel { "parallel" } else { "sequential" }),
            &symbols,
            |b, symbols| b.iter(|| ranker.rank_sector(&provider, "bench", black_box(symbols))),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_metrics, bench_optimizer, bench_ranking);
criterion_main!(benches);
