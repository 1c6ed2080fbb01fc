//! The shared block cache.
//!
//! Blocks are keyed by [`BlockId`] and spread over `2^shard_bits` shards,
//! each behind its own lock. Residency is counted globally so the cache
//! holds about `memory_budget / block_size` blocks no matter how the ids
//! hash.
//!
//! # Eviction
//!
//! Each shard keeps one second-chance FIFO per [`CachePriority`] tier. A hit
//! sets the block's referenced bit; the eviction scan clears set bits and
//! re-queues those blocks, and removes the first unreferenced, unpinned block
//! it finds. Low priority blocks are always tried before high priority ones.
//! If every candidate is pinned the cache runs over capacity instead of
//! failing the insert.
//!
//! # In-flight fetches
//!
//! [`BlockCache::lookup`] hands the first caller to miss on a block a
//! [`Reservation`]. Later callers get a [`Deferred`] that completes when the
//! reservation is filled or abandoned, so each block is fetched once no
//! matter how many readers want it at the same time.

use crate::allocator::BlockAllocator;
use crate::block::{BlockBuf, BlockId};
use crate::config::{BlockCacheConfig, CachePriority};
use crate::error::{CacheResult, FillFailure};
use crate::handle::{BlockHandle, CachedBlock};
use crate::metrics::{CacheCounters, CacheStatsSnapshot};
use ahash::{AHashMap, RandomState};
use io_continuation::{Deferred, Promise, deferred};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, trace};

/// Outcome delivered to callers that waited on another caller's fetch.
pub type FillResult = Result<BlockHandle, FillFailure>;

/// Result of [`BlockCache::lookup`].
#[derive(Debug)]
pub enum Lookup {
    /// The block is resident; the handle pins it.
    Hit(BlockHandle),
    /// Another caller is fetching the block.
    Pending(Deferred<FillResult>),
    /// The caller is now the only fetcher for the block.
    Miss(Reservation),
}

/// Shared block cache. Cloning shares the cache.
#[derive(Clone)]
pub struct BlockCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    shards: Box<[Shard]>,
    shard_mask: usize,
    hasher: RandomState,
    allocator: BlockAllocator,
    capacity: usize,
    resident: AtomicUsize,
    counters: CacheCounters,
    namespaces: Mutex<AHashMap<String, u64>>,
}

struct Shard {
    state: Mutex<ShardState>,
}

#[derive(Default)]
struct ShardState {
    entries: AHashMap<BlockId, Arc<CachedBlock>>,
    in_flight: AHashMap<BlockId, Vec<Promise<FillResult>>>,
    /// Second-chance queues indexed by [`CachePriority::tier`].
    queues: [VecDeque<BlockId>; 2],
}

impl ShardState {
    fn pin_resident(&self, id: &BlockId) -> Option<BlockHandle> {
        self.entries.get(id).map(|block| {
            block.referenced.store(true, Ordering::Relaxed);
            BlockHandle::pin(block.clone())
        })
    }

    /// Insert `buf` unless `id` is already resident. Returns a handle to the
    /// resident block and whether the insert happened.
    fn insert(
        &mut self,
        id: BlockId,
        buf: BlockBuf,
        priority: CachePriority,
        allocator: &BlockAllocator,
    ) -> (BlockHandle, bool) {
        if let Some(handle) = self.pin_resident(&id) {
            allocator.free(buf);
            return (handle, false);
        }

        let block = Arc::new(CachedBlock::new(id, buf, priority, allocator.clone()));
        let handle = BlockHandle::pin(block.clone());
        self.queues[priority.tier()].push_back(id);
        self.entries.insert(id, block);
        (handle, true)
    }

    fn evict_one(&mut self, tier: usize, counters: &CacheCounters) -> Option<Arc<CachedBlock>> {
        // two passes: the first may only clear referenced bits
        let mut budget = self.queues[tier].len() * 2;
        while budget > 0 {
            budget -= 1;
            let id = self.queues[tier].pop_front()?;
            let Some(block) = self.entries.get(&id) else {
                continue;
            };
            if block.is_pinned() {
                CacheCounters::incr(&counters.pinned_skips);
                self.queues[tier].push_back(id);
                continue;
            }
            if block.referenced.swap(false, Ordering::Relaxed) {
                self.queues[tier].push_back(id);
                continue;
            }
            return self.entries.remove(&id);
        }
        None
    }
}

impl BlockCache {
    /// Build a cache and its allocator.
    pub fn new(config: &BlockCacheConfig) -> CacheResult<Self> {
        config.validate()?;
        let allocator = BlockAllocator::new(config.block_size, config.memory_budget)?;
        let shards: Box<[Shard]> = (0..config.shards())
            .map(|_| Shard {
                state: Mutex::new(ShardState::default()),
            })
            .collect();

        debug!(
            block_size = config.block_size,
            capacity = allocator.capacity(),
            shards = shards.len(),
            "created block cache"
        );

        Ok(Self {
            inner: Arc::new(CacheInner {
                shard_mask: shards.len() - 1,
                shards,
                hasher: RandomState::new(),
                capacity: allocator.capacity(),
                allocator,
                resident: AtomicUsize::new(0),
                counters: CacheCounters::default(),
                namespaces: Mutex::new(AHashMap::new()),
            }),
        })
    }

    #[inline]
    fn shard_index(&self, id: &BlockId) -> usize {
        self.inner.hasher.hash_one(id) as usize & self.inner.shard_mask
    }

    /// Look up a resident block. Never waits for I/O.
    pub fn get(&self, id: BlockId) -> Option<BlockHandle> {
        let shard = &self.inner.shards[self.shard_index(&id)];
        let handle = shard.state.lock().pin_resident(&id);
        match handle {
            Some(_) => CacheCounters::incr(&self.inner.counters.hits),
            None => CacheCounters::incr(&self.inner.counters.misses),
        }
        handle
    }

    /// Insert a filled block. If `id` is already resident the existing copy
    /// wins and `buf` goes back to the allocator.
    pub fn put(&self, id: BlockId, buf: BlockBuf, priority: CachePriority) -> BlockHandle {
        let index = self.shard_index(&id);
        let (handle, inserted) =
            self.inner.shards[index]
                .state
                .lock()
                .insert(id, buf, priority, &self.inner.allocator);
        self.after_insert(index, inserted);
        handle
    }

    /// Look up a block, reserving the fetch on a miss.
    pub fn lookup(&self, id: BlockId) -> Lookup {
        let counters = &self.inner.counters;
        let mut state = self.inner.shards[self.shard_index(&id)].state.lock();

        if let Some(handle) = state.pin_resident(&id) {
            drop(state);
            CacheCounters::incr(&counters.hits);
            return Lookup::Hit(handle);
        }

        if let Some(waiters) = state.in_flight.get_mut(&id) {
            let (promise, pending) = deferred();
            waiters.push(promise);
            drop(state);
            CacheCounters::incr(&counters.misses);
            CacheCounters::incr(&counters.joined);
            return Lookup::Pending(pending);
        }

        state.in_flight.insert(id, Vec::new());
        drop(state);
        CacheCounters::incr(&counters.misses);
        Lookup::Miss(Reservation {
            cache: self.clone(),
            id,
            armed: true,
        })
    }

    fn after_insert(&self, shard: usize, inserted: bool) {
        let counters = &self.inner.counters;
        if !inserted {
            CacheCounters::incr(&counters.duplicate_puts);
            return;
        }
        CacheCounters::incr(&counters.inserts);
        self.inner.resident.fetch_add(1, Ordering::Relaxed);
        self.evict_to_capacity(shard);
    }

    fn evict_to_capacity(&self, start: usize) {
        let inner = &*self.inner;
        while inner.resident.load(Ordering::Relaxed) > inner.capacity {
            let mut victim = None;
            'tiers: for tier in [CachePriority::Low.tier(), CachePriority::High.tier()] {
                for step in 0..inner.shards.len() {
                    let shard = &inner.shards[(start + step) & inner.shard_mask];
                    victim = shard.state.lock().evict_one(tier, &inner.counters);
                    if victim.is_some() {
                        break 'tiers;
                    }
                }
            }

            match victim {
                Some(block) => {
                    trace!(block = %block.id, "evicted block");
                    inner.resident.fetch_sub(1, Ordering::Relaxed);
                    CacheCounters::incr(&inner.counters.evictions);
                    // outside the shard lock: may hand the buffer back to the allocator
                    drop(block);
                }
                None => {
                    trace!(
                        resident = inner.resident.load(Ordering::Relaxed),
                        capacity = inner.capacity,
                        "every eviction candidate is pinned"
                    );
                    return;
                }
            }
        }
    }

    fn complete_fill(&self, id: BlockId, buf: BlockBuf, priority: CachePriority) -> BlockHandle {
        let index = self.shard_index(&id);
        let (handle, inserted, waiters) = {
            let mut state = self.inner.shards[index].state.lock();
            let waiters = state.in_flight.remove(&id).unwrap_or_default();
            let (handle, inserted) = state.insert(id, buf, priority, &self.inner.allocator);
            (handle, inserted, waiters)
        };
        self.after_insert(index, inserted);
        for waiter in waiters {
            waiter.set(Ok(handle.clone()));
        }
        handle
    }

    fn fail_fill(&self, id: BlockId, reason: FillFailure) {
        let waiters = self.inner.shards[self.shard_index(&id)]
            .state
            .lock()
            .in_flight
            .remove(&id)
            .unwrap_or_default();
        CacheCounters::incr(&self.inner.counters.failed_fills);
        debug!(block = %id, %reason, waiters = waiters.len(), "abandoned block fetch");
        for waiter in waiters {
            waiter.set(Err(reason));
        }
    }

    /// Stable file id for `key`. The same key always maps to the same id for
    /// the lifetime of the cache.
    pub fn namespace(&self, key: &str) -> u64 {
        let mut namespaces = self.inner.namespaces.lock();
        let next = namespaces.len() as u64 + 1;
        *namespaces.entry(key.to_string()).or_insert(next)
    }

    pub fn allocator(&self) -> &BlockAllocator {
        &self.inner.allocator
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.inner.allocator.block_size()
    }

    /// Soft capacity in blocks.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn resident_blocks(&self) -> usize {
        self.inner.resident.load(Ordering::Relaxed)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.inner.shards[self.shard_index(&id)]
            .state
            .lock()
            .entries
            .contains_key(&id)
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot::load(
            &self.inner.counters,
            self.resident_blocks() as u64,
            self.inner.capacity as u64,
        )
    }
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("block_size", &self.block_size())
            .field("capacity", &self.inner.capacity)
            .field("resident", &self.resident_blocks())
            .field("shards", &self.inner.shards.len())
            .finish()
    }
}

/// The right to fetch one block.
///
/// Fill it with the fetched bytes or abandon it with a reason. Dropping an
/// unfilled reservation abandons it with [`FillFailure::Canceled`].
pub struct Reservation {
    cache: BlockCache,
    id: BlockId,
    armed: bool,
}

impl Reservation {
    #[inline]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Insert the fetched block and hand it to every waiter.
    pub fn fill(mut self, buf: BlockBuf, priority: CachePriority) -> BlockHandle {
        self.armed = false;
        self.cache.complete_fill(self.id, buf, priority)
    }

    /// Fail every waiter and let later lookups retry the fetch.
    pub fn abandon(mut self, reason: FillFailure) {
        self.armed = false;
        self.cache.fail_fill(self.id, reason);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            self.cache.fail_fill(self.id, FillFailure::Canceled);
        }
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation").field("id", &self.id).finish()
    }
}
