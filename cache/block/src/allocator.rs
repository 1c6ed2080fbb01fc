//! Pool of reusable block buffers.
//!
//! [`BlockAllocator`] hands out block-sized buffers and takes them back once
//! the cache drops a block. Returned buffers go on a lock-free free queue so
//! steady-state reads do not touch the global allocator. The pool size is a
//! soft limit: when the queue is empty a fresh buffer is allocated and the
//! overflow is counted rather than failing the caller.

use crate::block::BlockBuf;
use crate::error::{CacheError, CacheResult};
use crossbeam_deque::{Injector, Steal};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Shared pool of block buffers. Cloning shares the pool.
#[derive(Clone)]
pub struct BlockAllocator {
    inner: Arc<AllocatorInner>,
}

struct AllocatorInner {
    block_size: usize,
    capacity: usize,
    free_queue: Injector<Box<[u8]>>,
    /// Buffers sitting in the free queue.
    pooled: AtomicUsize,
    /// Buffers created and not yet released back to the system allocator.
    live: AtomicUsize,
    over_budget: AtomicU64,
}

impl BlockAllocator {
    /// Create a pool of `memory_budget / block_size` buffers.
    pub fn new(block_size: usize, memory_budget: usize) -> CacheResult<Self> {
        if block_size == 0 {
            return Err(CacheError::InvalidBlockSize);
        }
        let capacity = memory_budget / block_size;
        if capacity == 0 {
            return Err(CacheError::BudgetTooSmall);
        }

        Ok(Self {
            inner: Arc::new(AllocatorInner {
                block_size,
                capacity,
                free_queue: Injector::new(),
                pooled: AtomicUsize::new(0),
                live: AtomicUsize::new(0),
                over_budget: AtomicU64::new(0),
            }),
        })
    }

    /// Get an empty buffer, reusing a pooled one when available.
    pub fn alloc(&self) -> BlockBuf {
        loop {
            match self.inner.free_queue.steal() {
                Steal::Success(data) => {
                    self.inner.pooled.fetch_sub(1, Ordering::Relaxed);
                    return BlockBuf::pooled(data, self.clone());
                }
                Steal::Retry => continue,
                Steal::Empty => break,
            }
        }

        let live = self.inner.live.fetch_add(1, Ordering::Relaxed);
        if live >= self.inner.capacity {
            self.inner.over_budget.fetch_add(1, Ordering::Relaxed);
        }
        BlockBuf::pooled(
            vec![0u8; self.inner.block_size].into_boxed_slice(),
            self.clone(),
        )
    }

    /// Return a buffer to the pool. Dropping a [`BlockBuf`] does the same.
    pub fn free(&self, buf: BlockBuf) {
        self.release(buf.into_inner());
    }

    /// Pool `data`, or release it once the pool is full. Buffers of the wrong
    /// size are released.
    pub(crate) fn release(&self, data: Box<[u8]>) {
        if data.len() != self.inner.block_size {
            debug_assert!(
                false,
                "freed buffer of {} bytes to a {} byte pool",
                data.len(),
                self.inner.block_size
            );
            return;
        }

        if self.inner.pooled.fetch_add(1, Ordering::Relaxed) < self.inner.capacity {
            self.inner.free_queue.push(data);
        } else {
            self.inner.pooled.fetch_sub(1, Ordering::Relaxed);
            self.inner.live.fetch_sub(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    /// Number of buffers the budget covers.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Buffers currently handed out (not sitting in the pool).
    pub fn outstanding(&self) -> usize {
        self.inner
            .live
            .load(Ordering::Relaxed)
            .saturating_sub(self.inner.pooled.load(Ordering::Relaxed))
    }

    /// Buffers waiting in the pool.
    pub fn pooled(&self) -> usize {
        self.inner.pooled.load(Ordering::Relaxed)
    }

    /// Allocations made while the pool was already at capacity.
    pub fn over_budget(&self) -> u64 {
        self.inner.over_budget.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for BlockAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockAllocator")
            .field("block_size", &self.inner.block_size)
            .field("capacity", &self.inner.capacity)
            .field("outstanding", &self.outstanding())
            .field("pooled", &self.pooled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_invalid_sizes() {
        assert_eq!(BlockAllocator::new(0, 1024).unwrap_err(), CacheError::InvalidBlockSize);
        assert_eq!(BlockAllocator::new(4096, 1024).unwrap_err(), CacheError::BudgetTooSmall);
    }

    #[test]
    fn test_alloc_free_reuses() {
        let allocator = BlockAllocator::new(16, 64).unwrap();
        assert_eq!(allocator.capacity(), 4);

        let mut buf = allocator.alloc();
        assert_eq!(buf.capacity(), 16);
        assert_eq!(allocator.outstanding(), 1);
        buf.fill_from(b"hello");
        allocator.free(buf);
        assert_eq!(allocator.outstanding(), 0);
        assert_eq!(allocator.pooled(), 1);

        let buf = allocator.alloc();
        assert!(buf.is_empty());
        assert_eq!(allocator.pooled(), 0);
        assert_eq!(allocator.outstanding(), 1);
    }

    #[test]
    fn test_soft_limit() {
        let allocator = BlockAllocator::new(8, 16).unwrap();
        let bufs: Vec<_> = (0..5).map(|_| allocator.alloc()).collect();
        assert_eq!(allocator.outstanding(), 5);
        assert_eq!(allocator.over_budget(), 3);

        for buf in bufs {
            allocator.free(buf);
        }
        assert_eq!(allocator.pooled(), 2);
        assert_eq!(allocator.outstanding(), 0);
    }

    #[test]
    fn test_dropped_buffer_returns_to_pool() {
        let allocator = BlockAllocator::new(16, 64).unwrap();
        let bufs: Vec<_> = (0..3).map(|_| allocator.alloc()).collect();
        assert_eq!(allocator.outstanding(), 3);

        let handle = thread::spawn(move || drop(bufs));
        handle.join().unwrap();
        assert_eq!(allocator.outstanding(), 0);
        assert_eq!(allocator.pooled(), 3);

        let buf = allocator.alloc();
        assert_eq!(allocator.pooled(), 2);
        allocator.free(buf);
        assert_eq!(allocator.pooled(), 3);
        assert_eq!(allocator.outstanding(), 0);
    }

    #[test]
    fn test_concurrent_alloc_free() {
        let allocator = BlockAllocator::new(32, 32 * 64).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let allocator = allocator.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let a = allocator.alloc();
                        let b = allocator.alloc();
                        allocator.free(a);
                        allocator.free(b);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(allocator.outstanding(), 0);
        assert!(allocator.pooled() <= allocator.capacity());
    }
}
