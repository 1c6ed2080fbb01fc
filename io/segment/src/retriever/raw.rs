use super::{BlockData, BlockDataRetriever};
use crate::accessor::FileAccessor;
use crate::error::{ReadError, ReadResult};
use crate::option::ReadOption;
use block_cache::BlockHandle;
use std::sync::Arc;

/// Hands out the accessor's cached blocks unchanged.
pub struct RawRetriever {
    accessor: Arc<FileAccessor>,
    option: ReadOption,
    held: Vec<BlockHandle>,
}

impl RawRetriever {
    pub fn new(accessor: Arc<FileAccessor>, option: ReadOption) -> Self {
        Self {
            accessor,
            option,
            held: Vec::new(),
        }
    }

    /// Handles kept alive until the next [`reset`](BlockDataRetriever::reset).
    pub fn held_blocks(&self) -> usize {
        self.held.len()
    }
}

impl BlockDataRetriever for RawRetriever {
    fn retrieve_block_data(&mut self, offset: u64) -> ReadResult<Option<BlockData>> {
        if offset >= self.accessor.len() {
            return Ok(None);
        }
        let index = offset / self.accessor.block_size() as u64;
        let handle = match self.accessor.get_block_handles(&[index], &self.option).pop() {
            Some(result) => result?,
            None => return Err(ReadError::Corrupted(format!("no result for block {index}"))),
        };
        self.held.push(handle.clone());
        Ok(Some(BlockData::cached(index * self.accessor.block_size() as u64, handle)))
    }

    fn prefetch(&mut self, offset: u64, length: usize) -> ReadResult<()> {
        if length == 0 || offset >= self.accessor.len() {
            return Ok(());
        }
        self.accessor.prefetch(length, offset, &self.option)
    }

    fn reset(&mut self) {
        self.held.clear();
    }

    fn logical_length(&self) -> u64 {
        self.accessor.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::FileOptions;
    use block_cache::{BlockCache, BlockCacheConfig};

    fn accessor(len: usize) -> (MemoryBackend, Arc<FileAccessor>) {
        let backend = MemoryBackend::new();
        backend.insert("/raw", (0..len).map(|i| i as u8).collect::<Vec<_>>());
        let cache = BlockCache::new(
            &BlockCacheConfig::new()
                .with_block_size(4)
                .with_memory_budget(256)
                .with_shard_bits(0),
        )
        .unwrap();
        let accessor = FileAccessor::open("/raw", &backend, cache, FileOptions::new()).unwrap();
        (backend, Arc::new(accessor))
    }

    #[test]
    fn test_retrieve_and_reset() {
        let (_, accessor) = accessor(10);
        let mut retriever = RawRetriever::new(accessor.clone(), ReadOption::default());
        assert_eq!(retriever.logical_length(), 10);

        let block = retriever.retrieve_block_data(5).unwrap().unwrap();
        assert_eq!(block.start(), 4);
        assert_eq!(block.data(), &[4, 5, 6, 7]);

        let last = retriever.retrieve_block_data(9).unwrap().unwrap();
        assert_eq!((last.start(), last.len()), (8, 2));
        assert!(retriever.retrieve_block_data(10).unwrap().is_none());
        assert_eq!(retriever.held_blocks(), 2);

        retriever.reset();
        assert_eq!(retriever.held_blocks(), 0);
    }

    #[test]
    fn test_prefetch_warms_cache() {
        let (backend, accessor) = accessor(16);
        let mut retriever = RawRetriever::new(accessor, ReadOption::default());
        retriever.prefetch(0, 16).unwrap();
        assert_eq!(backend.read_call_count(), 1);
        retriever.retrieve_block_data(12).unwrap().unwrap();
        assert_eq!(backend.read_call_count(), 1);
    }
}
