//! Performance benchmarks for the matcher and the ranking merge.
//!
//! Run with: cargo bench
//!
//! Target performance:
//! - Matching a query against 1000 candidates: < 5ms
//! - Merging and chunk-sorting 10k ranked items: < 5ms

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lumen::{MatchConfig, Matcher};

fn candidates() -> Vec<String> {
    (0..1000)
        .map(|i| format!("Application {i} - Test Entry for Benchmarking"))
        .collect()
}

/// Benchmark exact token matching over a realistic candidate set.
fn bench_exact_matching(c: &mut Criterion) {
    let entries = candidates();
    let queries = ["app", "test entry", "application 50", "bench"];

    let mut group = c.benchmark_group("exact_matching");
    for query in queries {
        group.bench_with_input(BenchmarkId::from_parameter(query), &query, |b, query| {
            let matcher = Matcher::new(query, MatchConfig::default());
            b.iter(|| {
                let hits = entries
                    .iter()
                    .filter(|e| matcher.match_str(e).is_match())
                    .count();
                black_box(hits)
            })
        });
    }
    group.finish();
}

/// Benchmark fuzzy matching, which pays for the edit-distance table.
fn bench_fuzzy_matching(c: &mut Criterion) {
    let entries = candidates();
    let config = MatchConfig {
        fuzzy: true,
        ..MatchConfig::default()
    };

    c.bench_function("fuzzy_matching", |b| {
        let matcher = Matcher::new("aplication", config.clone());
        b.iter(|| {
            let hits = entries
                .iter()
                .filter(|e| matcher.match_str(e).is_match())
                .count();
            black_box(hits)
        })
    });
}

/// Benchmark the tail partial sort used to stream ranked chunks.
fn bench_chunk_sort(c: &mut Criterion) {
    let scores: Vec<f32> = (0..10_000).map(|i| (i * 7919 % 10_000) as f32).collect();

    c.bench_function("chunk_sort_10k", |b| {
        b.iter(|| {
            let mut items = scores.clone();
            let mut delivered = 0;
            while !items.is_empty() {
                let chunk = 10.min(items.len());
                let split = items.len() - chunk;
                if split > 0 {
                    items.select_nth_unstable_by(split, |a, b| {
                        a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
                    });
                }
                items[split..].sort_unstable_by(|a, b| {
                    a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
                });
                delivered += chunk;
                items.truncate(split);
                if delivered >= 100 {
                    break;
                }
            }
            black_box(delivered)
        })
    });
}

criterion_group!(
    benches,
    bench_exact_matching,
    bench_fuzzy_matching,
    bench_chunk_sort
);
criterion_main!(benches);
