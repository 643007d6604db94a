//! Benchmarks for the member cache hot path.
//!
//! A cached member exit has to be decided in well under a millisecond, so
//! `get` on a warm cache is the operation that matters most. The other groups
//! cover the write paths taken at preload and on eviction.
//!
//! # Run Benchmarks
//!
//! ```sh
//! # Run all cache benchmarks
//! cargo bench --bench cache_bench
//!
//! # Run one group
//! cargo bench --bench cache_bench -- cache_get
//!
//! # Compare against a saved baseline
//! cargo bench --bench cache_bench -- --save-baseline main
//! cargo bench --bench cache_bench -- --baseline main
//! ```

use std::hint::black_box;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use exitgate_core::{MemberRecord, RecordStatus};
use exitgate_storage::MemberCache;

const TTL: Duration = Duration::from_secs(300);

fn member(i: usize) -> MemberRecord {
    MemberRecord {
        card_number: format!("MCARD{i:06}"),
        member_id: format!("MEM-{i}"),
        plate: None,
        entry_time: Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap(),
        record_id: format!("member_entry_MCARD{i:06}_1"),
        status: RecordStatus::Open,
    }
}

fn warm_cache(size: usize) -> MemberCache {
    let cache = MemberCache::new(size, TTL);
    cache.preload((0..size).map(member));
    cache
}

/// Lookups on a full cache: hits on the most and least recent entries, and a
/// miss.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_get");
    group.throughput(Throughput::Elements(1));

    for size in [100, 1000, 10_000] {
        let cache = warm_cache(size);
        let newest = format!("MCARD{:06}", size - 1);

        group.bench_with_input(BenchmarkId::new("hit_newest", size), &newest, |b, card| {
            b.iter(|| black_box(cache.get(black_box(card))));
        });

        // every hit promotes the entry, so cycle through all cards
        let cards: Vec<String> = (0..size).map(|i| format!("MCARD{i:06}")).collect();
        let mut next = 0;
        group.bench_with_input(BenchmarkId::new("hit_rotating", size), &cards, |b, cards| {
            b.iter(|| {
                next = (next + 1) % cards.len();
                black_box(cache.get(black_box(&cards[next])))
            });
        });

        group.bench_with_input(BenchmarkId::new("miss", size), &"NOPE", |b, card| {
            b.iter(|| black_box(cache.get(black_box(card))));
        });
    }

    group.finish();
}

/// Inserts into a full cache, each evicting the least recently used card.
fn bench_put_evicting(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_put");
    group.throughput(Throughput::Elements(1));

    for size in [100, 1000] {
        let cache = warm_cache(size);
        let mut i = size;
        group.bench_function(BenchmarkId::new("evicting", size), |b| {
            b.iter_batched(
                || {
                    i += 1;
                    member(i)
                },
                |record| cache.put(black_box(record)),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Preloading a cold cache, as done at lane start.
fn bench_preload(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_preload");

    for size in [100, 1000] {
        group.throughput(Throughput::Elements(size as u64));
        let records: Vec<MemberRecord> = (0..size).map(member).collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &records, |b, records| {
            b.iter_batched(
                || records.clone(),
                |records| {
                    let cache = MemberCache::new(size, TTL);
                    black_box(cache.preload(records))
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_get, bench_put_evicting, bench_preload);
criterion_main!(benches);
