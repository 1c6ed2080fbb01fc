//! Cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) joined: AtomicU64,
    pub(crate) inserts: AtomicU64,
    pub(crate) duplicate_puts: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) pinned_skips: AtomicU64,
    pub(crate) failed_fills: AtomicU64,
}

impl CacheCounters {
    #[inline]
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    /// Lookups that found a resident block.
    pub hits: u64,
    /// Lookups that did not, including those that joined an in-flight fetch.
    pub misses: u64,
    /// Misses that waited on another caller's fetch instead of fetching.
    pub joined: u64,
    /// Blocks inserted.
    pub inserts: u64,
    /// Puts that lost to an already resident copy.
    pub duplicate_puts: u64,
    /// Blocks evicted.
    pub evictions: u64,
    /// Eviction candidates passed over because they were pinned.
    pub pinned_skips: u64,
    /// Fetches abandoned with a failure.
    pub failed_fills: u64,
    /// Blocks currently resident.
    pub resident_blocks: u64,
    /// Soft capacity in blocks.
    pub capacity: u64,
}

impl CacheStatsSnapshot {
    pub(crate) fn load(counters: &CacheCounters, resident_blocks: u64, capacity: u64) -> Self {
        Self {
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            joined: counters.joined.load(Ordering::Relaxed),
            inserts: counters.inserts.load(Ordering::Relaxed),
            duplicate_puts: counters.duplicate_puts.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            pinned_skips: counters.pinned_skips.load(Ordering::Relaxed),
            failed_fills: counters.failed_fills.load(Ordering::Relaxed),
            resident_blocks,
            capacity,
        }
    }

    /// Hit rate as a percentage (0.0 - 100.0).
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            (self.hits as f64 / lookups as f64) * 100.0
        }
    }
}
