//! Sources of logical blocks for a [`ByteSliceList`](crate::ByteSliceList).
//!
//! A retriever maps a logical offset to the block that contains it.
//! [`RawRetriever`] returns the accessor's cached blocks as they are;
//! [`CompressedRetriever`] reads and decodes compressed blocks.

mod compressed;
mod raw;

pub use compressed::{CompressedLayout, CompressedRetriever};
pub use raw::RawRetriever;

use crate::error::ReadResult;
use block_cache::BlockHandle;
use bytes::Bytes;
use std::fmt;
use std::ops::Deref;

#[derive(Clone)]
enum BlockBytes {
    Cached(BlockHandle),
    Decoded(Bytes),
}

impl Deref for BlockBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Cached(handle) => handle.data(),
            Self::Decoded(bytes) => bytes,
        }
    }
}

/// One logical block: its bytes and where they start.
///
/// Cheap to clone. A block backed by the cache keeps it pinned for as long
/// as any clone is alive.
#[derive(Clone)]
pub struct BlockData {
    start: u64,
    bytes: BlockBytes,
}

impl BlockData {
    pub fn cached(start: u64, handle: BlockHandle) -> Self {
        Self {
            start,
            bytes: BlockBytes::Cached(handle),
        }
    }

    pub fn decoded(start: u64, bytes: Bytes) -> Self {
        Self {
            start,
            bytes: BlockBytes::Decoded(bytes),
        }
    }

    /// Logical offset of the first byte.
    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Logical offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.start + self.bytes.len() as u64
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.start <= offset && offset < self.end()
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for BlockData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self.bytes {
            BlockBytes::Cached(_) => "cached",
            BlockBytes::Decoded(_) => "decoded",
        };
        f.debug_struct("BlockData")
            .field("start", &self.start)
            .field("len", &self.len())
            .field("source", &source)
            .finish()
    }
}

/// Produces the logical block containing a given offset.
pub trait BlockDataRetriever {
    /// The block containing `offset`, or `None` at or past the end.
    fn retrieve_block_data(&mut self, offset: u64) -> ReadResult<Option<BlockData>>;

    /// Warm whatever backs `[offset, offset + length)`.
    fn prefetch(&mut self, offset: u64, length: usize) -> ReadResult<()>;

    /// Release every block handed out so far.
    fn reset(&mut self);

    /// Length of the logical byte stream.
    fn logical_length(&self) -> u64;
}
