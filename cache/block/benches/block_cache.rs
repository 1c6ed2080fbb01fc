//! Benchmarks for block cache lookups and inserts.
//!
//! Run with: cargo bench -p block-cache --bench block_cache

use block_cache::{BlockCache, BlockCacheConfig, BlockId, CachePriority, Lookup};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::Arc;
use std::thread;

const BLOCK_SIZE: usize = 4096;

fn cache(blocks: usize, shard_bits: u8) -> BlockCache {
    BlockCache::new(
        &BlockCacheConfig::new()
            .with_block_size(BLOCK_SIZE)
            .with_memory_budget(BLOCK_SIZE * blocks)
            .with_shard_bits(shard_bits),
    )
    .unwrap()
}

fn warm(cache: &BlockCache, blocks: u64) {
    for index in 0..blocks {
        let mut buf = cache.allocator().alloc();
        buf.set_len(BLOCK_SIZE);
        drop(cache.put(BlockId::new(1, index), buf, CachePriority::Low));
    }
}

/// Benchmark hits on a fully resident working set.
fn bench_get_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_cache/get_hit");
    group.throughput(Throughput::Elements(1));

    for shard_bits in [0u8, 4] {
        let cache = cache(1024, shard_bits);
        warm(&cache, 1024);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);

        group.bench_with_input(
            BenchmarkId::new("shards", 1usize << shard_bits),
            &cache,
            |b, cache| {
                b.iter(|| {
                    let index = rng.random_range(0..1024);
                    black_box(cache.get(BlockId::new(1, index)))
                })
            },
        );
    }

    group.finish();
}

/// Benchmark the miss path: reserve, fill and evict.
fn bench_fill_evict(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_cache/fill_evict");
    group.throughput(Throughput::Elements(1));

    let cache = cache(256, 4);
    let mut next = 0u64;
    group.bench_function("lookup_fill", |b| {
        b.iter(|| {
            next += 1;
            if let Lookup::Miss(reservation) = cache.lookup(BlockId::new(2, next)) {
                let mut buf = cache.allocator().alloc();
                buf.set_len(BLOCK_SIZE);
                black_box(reservation.fill(buf, CachePriority::Low));
            }
        })
    });

    group.finish();
}

/// Benchmark concurrent hits from several threads.
fn bench_concurrent_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_cache/concurrent_get");

    for threads in [2usize, 4, 8] {
        let cache = Arc::new(cache(4096, 6));
        warm(&cache, 4096);
        let per_thread = 10_000u64;
        group.throughput(Throughput::Elements(per_thread * threads as u64));

        group.bench_with_input(BenchmarkId::new("threads", threads), &threads, |b, &threads| {
            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|t| {
                        let cache = cache.clone();
                        thread::spawn(move || {
                            let mut rng = Xoshiro256PlusPlus::seed_from_u64(t as u64);
                            for _ in 0..per_thread {
                                let index = rng.random_range(0..4096);
                                black_box(cache.get(BlockId::new(1, index)));
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_get_hit, bench_fill_evict, bench_concurrent_get);
criterion_main!(benches);
