//! Block identity and raw block buffers.

use crate::allocator::BlockAllocator;
use std::fmt;

/// Identity of a cached block: a file namespace and a block index in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId {
    pub file_id: u64,
    pub index: u64,
}

impl BlockId {
    pub const fn new(file_id: u64, index: u64) -> Self {
        Self { file_id, index }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_id, self.index)
    }
}

/// A block-sized buffer with a valid-data length.
///
/// Handed out by [`BlockAllocator::alloc`], filled by a backend, then moved
/// into the cache. A buffer that is dropped instead goes back to the pool it
/// came from.
pub struct BlockBuf {
    data: Box<[u8]>,
    len: usize,
    pool: Option<BlockAllocator>,
}

impl BlockBuf {
    #[cfg(test)]
    pub(crate) fn new(data: Box<[u8]>) -> Self {
        Self {
            data,
            len: 0,
            pool: None,
        }
    }

    pub(crate) fn pooled(data: Box<[u8]>, pool: BlockAllocator) -> Self {
        Self {
            data,
            len: 0,
            pool: Some(pool),
        }
    }

    /// Detach the buffer from its pool.
    pub(crate) fn into_inner(mut self) -> Box<[u8]> {
        self.pool = None;
        std::mem::take(&mut self.data)
    }

    /// Full size of the underlying buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of valid bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mark the first `len` bytes as valid.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the capacity.
    pub fn set_len(&mut self, len: usize) {
        assert!(len <= self.data.len(), "length {len} beyond block capacity");
        self.len = len;
    }

    /// The valid bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The whole buffer, for a backend to read into.
    #[inline]
    pub fn space_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copy `bytes` to the front of the buffer and mark them valid.
    pub fn fill_from(&mut self, bytes: &[u8]) {
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
    }
}

impl Drop for BlockBuf {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release(std::mem::take(&mut self.data));
        }
    }
}

impl fmt::Debug for BlockBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockBuf")
            .field("capacity", &self.data.len())
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_buf_len() {
        let mut buf = BlockBuf::new(vec![0u8; 8].into_boxed_slice());
        assert!(buf.is_empty());
        buf.space_mut()[..3].copy_from_slice(b"abc");
        buf.set_len(3);
        assert_eq!(buf.as_slice(), b"abc");
        assert_eq!(buf.capacity(), 8);

        buf.fill_from(b"xy");
        assert_eq!(buf.as_slice(), b"xy");
    }

    #[test]
    #[should_panic(expected = "beyond block capacity")]
    fn test_set_len_beyond_capacity() {
        let mut buf = BlockBuf::new(vec![0u8; 4].into_boxed_slice());
        buf.set_len(5);
    }

    #[test]
    fn test_block_id_order() {
        assert!(BlockId::new(1, 9) < BlockId::new(2, 0));
        assert_eq!(BlockId::new(3, 4).to_string(), "3:4");
    }
}
