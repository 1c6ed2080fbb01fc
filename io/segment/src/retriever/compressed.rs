use super::{BlockData, BlockDataRetriever};
use crate::accessor::FileAccessor;
use crate::codec::BlockDecoder;
use crate::error::{ReadError, ReadResult};
use crate::option::ReadOption;
use block_cache::{BlockHandle, BlockId};
use bytes::{Bytes, BytesMut};
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

/// Where each compressed block lives in the physical file.
///
/// The logical stream is cut into `block_size` pieces (the last may be
/// short); piece `i` is stored compressed at `offsets[i]..offsets[i + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedLayout {
    block_size: usize,
    logical_length: u64,
    offsets: Vec<u64>,
}

impl CompressedLayout {
    /// `offsets` holds one entry per block plus the end of the last block,
    /// and must not decrease.
    pub fn new(block_size: usize, logical_length: u64, offsets: Vec<u64>) -> ReadResult<Self> {
        if block_size == 0 {
            return Err(ReadError::BadArgument("compression block size must be non-zero".into()));
        }
        let blocks = logical_length.div_ceil(block_size as u64) as usize;
        if offsets.len() != blocks + 1 {
            return Err(ReadError::BadArgument(format!(
                "{} block offsets for {blocks} blocks",
                offsets.len()
            )));
        }
        if offsets.windows(2).any(|w| w[1] < w[0]) {
            return Err(ReadError::BadArgument("block offsets must not decrease".into()));
        }
        Ok(Self {
            block_size,
            logical_length,
            offsets,
        })
    }

    /// Build a layout from compressed block sizes laid out back to back from
    /// `base`.
    pub fn from_sizes(
        block_size: usize,
        logical_length: u64,
        base: u64,
        sizes: &[u64],
    ) -> ReadResult<Self> {
        let mut offsets = Vec::with_capacity(sizes.len() + 1);
        let mut next = base;
        offsets.push(next);
        for size in sizes {
            next += size;
            offsets.push(next);
        }
        Self::new(block_size, logical_length, offsets)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn logical_length(&self) -> u64 {
        self.logical_length
    }

    pub fn block_count(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Block holding logical `offset`, if it is inside the stream.
    pub fn block_for(&self, offset: u64) -> Option<usize> {
        (offset < self.logical_length).then(|| (offset / self.block_size as u64) as usize)
    }

    /// Stored byte range of `block`.
    pub fn physical_range(&self, block: usize) -> Range<u64> {
        self.offsets[block]..self.offsets[block + 1]
    }

    /// Decoded length of `block`.
    pub fn logical_len(&self, block: usize) -> usize {
        let start = block as u64 * self.block_size as u64;
        (self.logical_length - start).min(self.block_size as u64) as usize
    }
}

struct DecodedCache {
    file_id: u64,
    block_size: usize,
}

/// Reads compressed blocks through the accessor and decodes them.
///
/// Decoding alternates between a small ring of scratch buffers; a decoded
/// block's memory is reclaimed once every [`BlockData`] that refers to it is
/// gone. When the file was opened with `cache_decoded_blocks` and the cache
/// block size divides the compression block size, decoded blocks are also
/// stored in the block cache under a namespace of their own.
pub struct CompressedRetriever {
    accessor: Arc<FileAccessor>,
    option: ReadOption,
    layout: Arc<CompressedLayout>,
    decoder: Arc<dyn BlockDecoder>,
    scratch: Vec<BytesMut>,
    next_scratch: usize,
    compressed: Vec<u8>,
    decoded_cache: Option<DecodedCache>,
    held: Vec<BlockHandle>,
}

impl CompressedRetriever {
    pub fn new(
        accessor: Arc<FileAccessor>,
        option: ReadOption,
        layout: Arc<CompressedLayout>,
        decoder: Arc<dyn BlockDecoder>,
    ) -> Self {
        let cache_block_size = accessor.block_size();
        let decoded_cache = (accessor.options().cache_decoded_blocks
            && layout.block_size() % cache_block_size == 0)
            .then(|| DecodedCache {
                file_id: accessor
                    .cache()
                    .namespace(&format!("{}#decoded", accessor.path().display())),
                block_size: cache_block_size,
            });

        debug!(
            file = %accessor.tag(),
            codec = decoder.name(),
            blocks = layout.block_count(),
            decoded_cache = decoded_cache.is_some(),
            "compressed retriever ready"
        );

        Self {
            accessor,
            option,
            layout,
            decoder,
            scratch: vec![BytesMut::new(), BytesMut::new()],
            next_scratch: 0,
            compressed: Vec::new(),
            decoded_cache,
            held: Vec::new(),
        }
    }

    /// Rotate through `count` scratch buffers instead of two.
    pub fn with_scratch_buffers(mut self, count: usize) -> Self {
        self.scratch = (0..count.max(1)).map(|_| BytesMut::new()).collect();
        self.next_scratch = 0;
        self
    }

    /// Whether decoded blocks go into the block cache.
    pub fn decoded_cache_enabled(&self) -> bool {
        self.decoded_cache.is_some()
    }

    pub fn layout(&self) -> &CompressedLayout {
        &self.layout
    }

    fn decode_block(&mut self, block: usize) -> ReadResult<Bytes> {
        let range = self.layout.physical_range(block);
        let stored = (range.end - range.start) as usize;
        self.compressed.resize(stored, 0);
        if stored > 0 {
            let n = self.accessor.read(&mut self.compressed, range.start, &self.option)?;
            if n != stored {
                return Err(ReadError::Corrupted(format!(
                    "compressed block {block} truncated: {n} of {stored} bytes"
                )));
            }
        }

        let expected = self.layout.logical_len(block);
        let slot = self.next_scratch;
        self.next_scratch = (slot + 1) % self.scratch.len();
        let scratch = &mut self.scratch[slot];
        scratch.clear();
        scratch.resize(expected, 0);

        let n = self
            .decoder
            .decode(&self.compressed, &mut scratch[..])
            .map_err(|e| ReadError::Corrupted(format!("block {block}: {e}")))?;
        if n != expected {
            return Err(ReadError::Corrupted(format!(
                "block {block} decoded to {n} bytes, expected {expected}"
            )));
        }
        Ok(scratch.split().freeze())
    }

    fn cached_decoded(&mut self, offset: u64) -> Option<BlockData> {
        let cache = self.decoded_cache.as_ref()?;
        let index = offset / cache.block_size as u64;
        let handle = self.accessor.cache().get(BlockId::new(cache.file_id, index))?;
        self.held.push(handle.clone());
        Some(BlockData::cached(index * cache.block_size as u64, handle))
    }

    /// Store `decoded` (starting at logical `start`) as cache blocks and
    /// return the one containing `offset`.
    fn store_decoded(&mut self, start: u64, decoded: &[u8], offset: u64) -> Option<BlockData> {
        let cache = self.decoded_cache.as_ref()?;
        let block_cache = self.accessor.cache();
        let priority = self.accessor.options().priority;
        let first = start / cache.block_size as u64;

        let mut found = None;
        for (i, piece) in decoded.chunks(cache.block_size).enumerate() {
            let index = first + i as u64;
            let mut buf = block_cache.allocator().alloc();
            buf.fill_from(piece);
            let handle = block_cache.put(BlockId::new(cache.file_id, index), buf, priority);
            let piece_start = index * cache.block_size as u64;
            if (piece_start..piece_start + piece.len() as u64).contains(&offset) {
                self.held.push(handle.clone());
                found = Some(BlockData::cached(piece_start, handle));
            }
        }
        found
    }
}

impl BlockDataRetriever for CompressedRetriever {
    fn retrieve_block_data(&mut self, offset: u64) -> ReadResult<Option<BlockData>> {
        let Some(block) = self.layout.block_for(offset) else {
            return Ok(None);
        };
        if let Some(data) = self.cached_decoded(offset) {
            return Ok(Some(data));
        }

        let decoded = self.decode_block(block)?;
        let start = block as u64 * self.layout.block_size() as u64;
        if self.decoded_cache.is_some() {
            return match self.store_decoded(start, &decoded, offset) {
                Some(data) => Ok(Some(data)),
                None => Err(ReadError::Corrupted(format!(
                    "decoded block {block} does not cover offset {offset}"
                ))),
            };
        }
        Ok(Some(BlockData::decoded(start, decoded)))
    }

    fn prefetch(&mut self, offset: u64, length: usize) -> ReadResult<()> {
        let end = offset.saturating_add(length as u64).min(self.layout.logical_length());
        let last = end.checked_sub(1).and_then(|e| self.layout.block_for(e));
        let (Some(first), Some(last)) = (self.layout.block_for(offset), last) else {
            return Ok(());
        };
        if last < first {
            return Ok(());
        }
        let start = self.layout.physical_range(first).start;
        let stored = (self.layout.physical_range(last).end - start) as usize;
        if stored == 0 {
            return Ok(());
        }
        self.accessor.prefetch(stored, start, &self.option)
    }

    fn reset(&mut self) {
        self.held.clear();
    }

    fn logical_length(&self) -> u64 {
        self.layout.logical_length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::codec::{StoredDecoder, ZstdDecoder};
    use crate::config::FileOptions;
    use crate::error::ErrorKind;
    use block_cache::{BlockCache, BlockCacheConfig};

    fn plain(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    /// Compress `data` in `block_size` pieces and return the file and sizes.
    fn compress(data: &[u8], block_size: usize) -> (Vec<u8>, Vec<u64>) {
        let mut file = Vec::new();
        let mut sizes = Vec::new();
        for chunk in data.chunks(block_size) {
            let frame = zstd::bulk::compress(chunk, 1).unwrap();
            sizes.push(frame.len() as u64);
            file.extend_from_slice(&frame);
        }
        (file, sizes)
    }

    fn accessor(file: Vec<u8>, options: FileOptions) -> Arc<FileAccessor> {
        let backend = MemoryBackend::new();
        backend.insert("/c.seg", file);
        let cache = BlockCache::new(
            &BlockCacheConfig::new()
                .with_block_size(16)
                .with_memory_budget(16 * 128)
                .with_shard_bits(0),
        )
        .unwrap();
        Arc::new(FileAccessor::open("/c.seg", &backend, cache, options).unwrap())
    }

    #[test]
    fn test_layout_validation() {
        assert!(CompressedLayout::new(0, 10, vec![0, 1]).is_err());
        assert!(CompressedLayout::new(4, 10, vec![0, 1, 2]).is_err());
        assert!(CompressedLayout::new(4, 10, vec![0, 3, 2, 5]).is_err());

        let layout = CompressedLayout::from_sizes(4, 10, 100, &[3, 0, 2]).unwrap();
        assert_eq!(layout.block_count(), 3);
        assert_eq!(layout.physical_range(0), 100..103);
        assert_eq!(layout.physical_range(1), 103..103);
        assert_eq!(layout.logical_len(2), 2);
        assert_eq!(layout.block_for(9), Some(2));
        assert_eq!(layout.block_for(10), None);
    }

    #[test]
    fn test_zstd_blocks() {
        let data = plain(100);
        let (file, sizes) = compress(&data, 32);
        let layout = Arc::new(CompressedLayout::from_sizes(32, 100, 0, &sizes).unwrap());
        let mut retriever = CompressedRetriever::new(
            accessor(file, FileOptions::new()),
            ReadOption::default(),
            layout,
            Arc::new(ZstdDecoder),
        );
        assert!(!retriever.decoded_cache_enabled());

        let block = retriever.retrieve_block_data(40).unwrap().unwrap();
        assert_eq!((block.start(), block.len()), (32, 32));
        assert_eq!(block.data(), &data[32..64]);

        // the previous block stays valid while the scratch ring rotates
        let next = retriever.retrieve_block_data(64).unwrap().unwrap();
        let last = retriever.retrieve_block_data(99).unwrap().unwrap();
        assert_eq!(block.data(), &data[32..64]);
        assert_eq!(next.data(), &data[64..96]);
        assert_eq!(last.data(), &data[96..100]);
        assert!(retriever.retrieve_block_data(100).unwrap().is_none());
    }

    #[test]
    fn test_decoded_cache() {
        let data = plain(64);
        let (file, sizes) = compress(&data, 32);
        let layout = Arc::new(CompressedLayout::from_sizes(32, 64, 0, &sizes).unwrap());
        let accessor = accessor(file, FileOptions::new().with_cache_decoded_blocks(true));
        let mut retriever = CompressedRetriever::new(
            accessor.clone(),
            ReadOption::default(),
            layout,
            Arc::new(ZstdDecoder),
        );
        assert!(retriever.decoded_cache_enabled());

        let block = retriever.retrieve_block_data(20).unwrap().unwrap();
        assert_eq!((block.start(), block.len()), (16, 16));
        assert_eq!(block.data(), &data[16..32]);

        // block 0 of the same compressed block was stored too
        let hits_before = accessor.cache().stats().hits;
        let first = retriever.retrieve_block_data(3).unwrap().unwrap();
        assert_eq!(first.data(), &data[..16]);
        assert_eq!(accessor.cache().stats().hits, hits_before + 1);
    }

    #[test]
    fn test_decoded_cache_needs_divisible_sizes() {
        let data = plain(48);
        let (file, sizes) = compress(&data, 24);
        let layout = Arc::new(CompressedLayout::from_sizes(24, 48, 0, &sizes).unwrap());
        let retriever = CompressedRetriever::new(
            accessor(file, FileOptions::new().with_cache_decoded_blocks(true)),
            ReadOption::default(),
            layout,
            Arc::new(ZstdDecoder),
        );
        assert!(!retriever.decoded_cache_enabled());
    }

    #[test]
    fn test_size_mismatch_is_corrupted() {
        // stored layout claims 8 logical bytes per block but holds 6
        let layout = Arc::new(CompressedLayout::from_sizes(8, 16, 0, &[6, 6]).unwrap());
        let mut retriever = CompressedRetriever::new(
            accessor(plain(12), FileOptions::new()),
            ReadOption::default(),
            layout,
            Arc::new(StoredDecoder),
        );
        let err = retriever.retrieve_block_data(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupted);
    }

    #[test]
    fn test_prefetch_reads_physical_span() {
        let data = plain(96);
        let (file, sizes) = compress(&data, 32);
        let total: u64 = sizes.iter().sum();
        let layout = Arc::new(CompressedLayout::from_sizes(32, 96, 0, &sizes).unwrap());
        let accessor = accessor(file, FileOptions::new());
        let mut retriever = CompressedRetriever::new(
            accessor.clone(),
            ReadOption::default(),
            layout,
            Arc::new(ZstdDecoder),
        );
        retriever.prefetch(0, 96).unwrap();
        let blocks = total.div_ceil(16);
        assert_eq!(accessor.cache().stats().inserts, blocks);
    }
}
