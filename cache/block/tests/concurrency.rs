//! Multi-threaded cache behavior.

use block_cache::{BlockCache, BlockCacheConfig, BlockHandle, BlockId, CachePriority, Lookup};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const BLOCK_SIZE: usize = 64;

fn cache(blocks: usize) -> BlockCache {
    BlockCache::new(
        &BlockCacheConfig::new()
            .with_block_size(BLOCK_SIZE)
            .with_memory_budget(BLOCK_SIZE * blocks)
            .with_shard_bits(3),
    )
    .unwrap()
}

fn pattern(index: u64) -> Vec<u8> {
    (0..BLOCK_SIZE).map(|i| (index as usize * 31 + i) as u8).collect()
}

fn fetch_through(cache: &BlockCache, id: BlockId, fetches: &AtomicUsize) -> BlockHandle {
    loop {
        match cache.lookup(id) {
            Lookup::Hit(handle) => return handle,
            Lookup::Pending(pending) => {
                if let Ok(Ok(handle)) = pending.wait() {
                    return handle;
                }
            }
            Lookup::Miss(reservation) => {
                fetches.fetch_add(1, Ordering::SeqCst);
                thread::yield_now();
                let mut buf = cache.allocator().alloc();
                buf.fill_from(&pattern(id.index));
                return reservation.fill(buf, CachePriority::Low);
            }
        }
    }
}

#[test]
fn concurrent_lookups_fetch_once() {
    let cache = cache(16);
    let fetches = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(8));
    let id = BlockId::new(cache.namespace("hot"), 7);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            let fetches = fetches.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                fetch_through(&cache, id, &fetches).data().to_vec()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), pattern(7));
    }
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[test]
fn pinned_blocks_survive_churn() {
    let cache = cache(32);
    let fetches = AtomicUsize::new(0);
    let pinned: Vec<_> = (0..8)
        .map(|i| fetch_through(&cache, BlockId::new(1, i), &fetches))
        .collect();

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || {
                let fetches = AtomicUsize::new(0);
                let mut rng = Xoshiro256PlusPlus::seed_from_u64(t);
                for _ in 0..2000 {
                    let index = rng.random_range(100..400);
                    let handle = fetch_through(&cache, BlockId::new(1, index), &fetches);
                    assert_eq!(handle.data(), pattern(index).as_slice());
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    for (i, handle) in pinned.iter().enumerate() {
        assert_eq!(handle.data(), pattern(i as u64).as_slice());
        assert!(cache.contains(BlockId::new(1, i as u64)));
    }
    assert!(cache.stats().evictions > 0);
}
