//! Benchmarks for rule compilation, reconciliation and matching.
//!
//! Run with: cargo bench
//!
//! This benchmark suite measures:
//! - Planning a full rule set from scratch
//! - Re-planning an unchanged rule set (the common no-op pass)
//! - First-match lookups over large entry lists

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use url_blocker::compiler::plan;
use url_blocker::{find_match, BlockerConfig, PatternEntry, PatternIdMap};

/// Generate entries: a mix of host+path and bare substring patterns.
fn generate_entries(count: usize) -> Vec<PatternEntry> {
    (0..count)
        .map(|i| {
            let pattern = if i % 3 == 0 {
                format!("||tracker{}", i)
            } else {
                format!("||site{}.example.com/path{}^", i, i % 50)
            };
            PatternEntry::new(pattern, "")
        })
        .collect()
}

/// Benchmark planning from an empty engine.
fn bench_initial_plan(c: &mut Criterion) {
    let compiler = BlockerConfig::default().compiler();
    let mut group = c.benchmark_group("initial_plan");

    for size in [100, 1_000, 10_000].iter() {
        let entries = generate_entries(*size);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("entries", size), size, |b, _| {
            b.iter(|| {
                let mut map = PatternIdMap::new();
                black_box(plan(&entries, &mut map, &[], &compiler).unwrap())
            })
        });
    }

    group.finish();
}

/// Benchmark the idempotent pass against an already installed set.
fn bench_noop_plan(c: &mut Criterion) {
    let compiler = BlockerConfig::default().compiler();
    let entries = generate_entries(5_000);
    let mut map = PatternIdMap::new();
    let installed = plan(&entries, &mut map, &[], &compiler).unwrap().desired;

    let mut group = c.benchmark_group("noop_plan");
    group.throughput(Throughput::Elements(entries.len() as u64));
    group.bench_function("5000_entries", |b| {
        b.iter(|| {
            let mut map = map.clone();
            let result = plan(&entries, &mut map, &installed, &compiler).unwrap();
            debug_assert!(result.is_empty());
            black_box(result)
        })
    });
    group.finish();
}

/// Benchmark first-match lookups, hits near the end and misses.
fn bench_find_match(c: &mut Criterion) {
    let entries = generate_entries(5_000);
    let urls = [
        "https://site4999.example.com/path49/page",
        "https://nowhere.test/index.html",
    ];

    let mut group = c.benchmark_group("find_match");
    group.throughput(Throughput::Elements(urls.len() as u64));
    group.bench_function("late_hit_and_miss", |b| {
        b.iter(|| {
            for url in &urls {
                black_box(find_match(url, &entries));
            }
        })
    });
    group.finish();
}

criterion_group!(benches, bench_initial_plan, bench_noop_plan, bench_find_match);
criterion_main!(benches);
