//! Cache configuration.

use crate::error::{CacheError, CacheResult};
use serde::Deserialize;

/// Largest supported shard count is `2^MAX_SHARD_BITS`.
pub const MAX_SHARD_BITS: u8 = 10;

const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;
const DEFAULT_MEMORY_BUDGET: usize = 256 * 1024 * 1024;

/// Eviction tier of a cached block.
///
/// Any evictable `Low` block goes before any `High` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePriority {
    High,
    #[default]
    Low,
}

impl CachePriority {
    pub(crate) fn tier(self) -> usize {
        match self {
            Self::Low => 0,
            Self::High => 1,
        }
    }
}

impl std::fmt::Display for CachePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Sizing for a [`BlockCache`](crate::BlockCache) and its allocator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockCacheConfig {
    /// Size of every block in bytes.
    #[serde(default = "default_block_size", deserialize_with = "deserialize_size")]
    pub block_size: usize,

    /// Soft bound on resident block memory in bytes.
    #[serde(default = "default_memory_budget", deserialize_with = "deserialize_size")]
    pub memory_budget: usize,

    /// The id space is split over `2^shard_bits` independently locked shards.
    #[serde(default = "default_shard_bits")]
    pub shard_bits: u8,
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_memory_budget() -> usize {
    DEFAULT_MEMORY_BUDGET
}

fn default_shard_bits() -> u8 {
    4
}

impl Default for BlockCacheConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            memory_budget: default_memory_budget(),
            shard_bits: default_shard_bits(),
        }
    }
}

impl BlockCacheConfig {
    /// Create a config with default sizing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the block size in bytes.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the memory budget in bytes.
    pub fn with_memory_budget(mut self, memory_budget: usize) -> Self {
        self.memory_budget = memory_budget;
        self
    }

    /// Set the number of shard bits.
    pub fn with_shard_bits(mut self, shard_bits: u8) -> Self {
        self.shard_bits = shard_bits;
        self
    }

    /// Capacity in blocks.
    pub fn capacity(&self) -> usize {
        self.memory_budget.checked_div(self.block_size).unwrap_or(0)
    }

    /// Number of shards.
    pub fn shards(&self) -> usize {
        1 << self.shard_bits.min(MAX_SHARD_BITS)
    }

    pub fn validate(&self) -> CacheResult<()> {
        if self.block_size == 0 {
            return Err(CacheError::InvalidBlockSize);
        }
        if self.capacity() == 0 {
            return Err(CacheError::BudgetTooSmall);
        }
        if self.shard_bits > MAX_SHARD_BITS {
            return Err(CacheError::InvalidShardBits);
        }
        Ok(())
    }
}

/// Deserialize a size given either as a number of bytes or as a string such
/// as `"64KB"`.
pub fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeValue {
        Number(usize),
        String(String),
    }

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Number(n) => Ok(n),
        SizeValue::String(s) => parse_size(&s).map_err(D::Error::custom),
    }
}

/// Parse a size string like "4KB", "64MB", "1GB" into bytes.
pub fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_alphabetic()) {
        Some(idx) => (&s[..idx], s[idx..].to_uppercase()),
        None => (s, String::new()),
    };

    let num: usize = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number: {num_str}"))?;

    let multiplier: usize = match suffix.as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return Err(format!("unknown size suffix: {suffix}")),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| "size overflow".to_string())
}
