//! Error types for block cache construction and fills.

use std::fmt;

/// Errors raised while building a cache or allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// Block size must be non-zero.
    InvalidBlockSize,

    /// The memory budget cannot hold a single block.
    BudgetTooSmall,

    /// Shard bits must be at most [`MAX_SHARD_BITS`](crate::config::MAX_SHARD_BITS).
    InvalidShardBits,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBlockSize => write!(f, "block size must be non-zero"),
            Self::BudgetTooSmall => write!(f, "memory budget smaller than one block"),
            Self::InvalidShardBits => write!(f, "too many shard bits"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Result type for cache construction.
pub type CacheResult<T> = Result<T, CacheError>;

/// Why an in-flight fill did not produce a block.
///
/// Delivered to every caller that was waiting on the same block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillFailure {
    /// The backend read failed.
    Io,

    /// The fetcher's time budget ran out before it issued the read.
    Timeout,

    /// The backend returned fewer bytes than the block must hold.
    Corrupted,

    /// The fetcher went away without filling or abandoning.
    Canceled,
}

impl fmt::Display for FillFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "block fetch failed"),
            Self::Timeout => write!(f, "block fetch timed out before dispatch"),
            Self::Corrupted => write!(f, "block fetch returned short data"),
            Self::Canceled => write!(f, "block fetch abandoned"),
        }
    }
}

impl std::error::Error for FillFailure {}
