//! Shared block cache for the segment read path.
//!
//! - [`BlockAllocator`] - pool of block-sized buffers
//! - [`BlockCache`] - `(file id, block index) -> block` map with pinning,
//!   priority tiers and in-flight fetch reservations
//! - [`BlockHandle`] - pinned view of a resident block
//!
//! # Example
//!
//! ```
//! use block_cache::{BlockCache, BlockCacheConfig, BlockId, CachePriority, Lookup};
//!
//! let cache = BlockCache::new(
//!     &BlockCacheConfig::new()
//!         .with_block_size(4096)
//!         .with_memory_budget(4096 * 16),
//! )
//! .unwrap();
//!
//! let id = BlockId::new(cache.namespace("segment-0"), 0);
//! if let Lookup::Miss(reservation) = cache.lookup(id) {
//!     let mut buf = cache.allocator().alloc();
//!     buf.fill_from(b"block bytes");
//!     reservation.fill(buf, CachePriority::Low);
//! }
//! assert_eq!(cache.get(id).unwrap().data(), b"block bytes");
//! ```

mod allocator;
mod block;
mod cache;
pub mod config;
mod error;
mod handle;
mod metrics;

pub use allocator::BlockAllocator;
pub use block::{BlockBuf, BlockId};
pub use cache::{BlockCache, FillResult, Lookup, Reservation};
pub use config::{BlockCacheConfig, CachePriority};
pub use error::{CacheError, CacheResult, FillFailure};
pub use handle::BlockHandle;
pub use metrics::CacheStatsSnapshot;
