//! Resident blocks and the pinned handles that expose them.

use crate::allocator::BlockAllocator;
use crate::block::{BlockBuf, BlockId};
use crate::config::CachePriority;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// A block owned by the cache.
///
/// `pins` counts live [`BlockHandle`]s. It only moves from 0 to 1 while the
/// owning shard is locked, which is also the only place eviction looks at it.
/// The buffer goes back to the allocator when the last reference drops, so a
/// block that is evicted while pinned stays intact until its handles go away.
pub(crate) struct CachedBlock {
    pub(crate) id: BlockId,
    data: Box<[u8]>,
    len: usize,
    pub(crate) priority: CachePriority,
    pub(crate) pins: AtomicU32,
    /// Second-chance bit, set on every hit.
    pub(crate) referenced: AtomicBool,
    allocator: BlockAllocator,
}

impl CachedBlock {
    pub(crate) fn new(
        id: BlockId,
        buf: BlockBuf,
        priority: CachePriority,
        allocator: BlockAllocator,
    ) -> Self {
        let len = buf.len();
        Self {
            id,
            data: buf.into_inner(),
            len,
            priority,
            pins: AtomicU32::new(0),
            referenced: AtomicBool::new(false),
            allocator,
        }
    }

    #[inline]
    pub(crate) fn is_pinned(&self) -> bool {
        self.pins.load(Ordering::Acquire) > 0
    }
}

impl Drop for CachedBlock {
    fn drop(&mut self) {
        self.allocator.release(std::mem::take(&mut self.data));
    }
}

/// A pinned reference to a resident block.
///
/// The block cannot be evicted or recycled while any handle to it is alive.
/// Cloning adds a pin; dropping releases one.
pub struct BlockHandle {
    block: Arc<CachedBlock>,
}

impl BlockHandle {
    /// Pin `block`. Callers hold the owning shard's lock unless the block is
    /// already pinned.
    pub(crate) fn pin(block: Arc<CachedBlock>) -> Self {
        block.pins.fetch_add(1, Ordering::AcqRel);
        Self { block }
    }

    #[inline]
    pub fn id(&self) -> BlockId {
        self.block.id
    }

    /// Valid bytes of the block. Shorter than the block size only for the
    /// last block of a file.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.block.data[..self.block.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.block.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.block.len == 0
    }

    pub fn priority(&self) -> CachePriority {
        self.block.priority
    }

    /// Live handles on this block, this one included.
    pub fn pin_count(&self) -> u32 {
        self.block.pins.load(Ordering::Acquire)
    }

    /// Whether two handles refer to the same resident block.
    pub fn ptr_eq(&self, other: &BlockHandle) -> bool {
        Arc::ptr_eq(&self.block, &other.block)
    }
}

impl Clone for BlockHandle {
    fn clone(&self) -> Self {
        Self::pin(self.block.clone())
    }
}

impl Drop for BlockHandle {
    fn drop(&mut self) {
        self.block.pins.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Deref for BlockHandle {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data()
    }
}

impl AsRef<[u8]> for BlockHandle {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

impl fmt::Debug for BlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockHandle")
            .field("id", &self.block.id)
            .field("len", &self.block.len)
            .field("pins", &self.pin_count())
            .finish()
    }
}
