//! Per-file configuration.

use crate::error::{ReadError, ReadResult};
use block_cache::CachePriority;
use serde::Deserialize;

/// Options fixed when a file is opened.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileOptions {
    /// Maximum number of contiguous missing blocks fetched by one backend
    /// call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Eviction tier of blocks fetched for this file.
    #[serde(default)]
    pub priority: CachePriority,

    /// Ask the backend to bypass the OS page cache.
    #[serde(default)]
    pub direct_io: bool,

    /// Keep decoded compressed blocks in the block cache.
    #[serde(default)]
    pub cache_decoded_blocks: bool,
}

fn default_batch_size() -> usize {
    16
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            priority: CachePriority::default(),
            direct_io: false,
            cache_decoded_blocks: false,
        }
    }
}

impl FileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_priority(mut self, priority: CachePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_direct_io(mut self, direct_io: bool) -> Self {
        self.direct_io = direct_io;
        self
    }

    pub fn with_cache_decoded_blocks(mut self, enabled: bool) -> Self {
        self.cache_decoded_blocks = enabled;
        self
    }

    pub fn validate(&self) -> ReadResult<()> {
        if self.batch_size == 0 {
            return Err(ReadError::BadArgument("batch_size must be at least 1".into()));
        }
        Ok(())
    }
}
