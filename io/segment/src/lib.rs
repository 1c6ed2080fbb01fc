//! Random-access reads over immutable segment files through a shared
//! [`BlockCache`](block_cache::BlockCache).
//!
//! - [`FileAccessor`] - byte-range and block reads with miss coalescing,
//!   in-flight deduplication and ordered batch reads
//! - [`StorageBackend`] - where file bytes come from ([`LocalFsBackend`],
//!   [`MemoryBackend`])
//! - [`BlockDataRetriever`] - logical blocks for a [`ByteSliceList`], either
//!   raw or decoded from compressed blocks
//! - [`ByteSliceReader`] - `Read + Seek` over a slice list
//!
//! # Example
//!
//! ```
//! use block_cache::{BlockCache, BlockCacheConfig};
//! use segment_reader::{FileAccessor, FileOptions, MemoryBackend, ReadOption};
//!
//! let backend = MemoryBackend::new();
//! backend.insert("/segments/0.idx", b"hello, segment".to_vec());
//!
//! let cache = BlockCache::new(&BlockCacheConfig::new().with_block_size(4096)).unwrap();
//! let file = FileAccessor::open("/segments/0.idx", &backend, cache, FileOptions::new()).unwrap();
//!
//! let mut buf = [0u8; 7];
//! let n = file.read(&mut buf, 7, &ReadOption::default()).unwrap();
//! assert_eq!(&buf[..n], b"segment");
//! ```

mod accessor;
pub mod backend;
mod codec;
pub mod config;
mod error;
mod fetch;
mod option;
mod reader;
pub mod retriever;
mod scalar;
mod slice_list;
pub mod telemetry;

pub use accessor::{FileAccessor, ReadRequest};
pub use backend::{BackendFile, BlockRead, LocalFsBackend, MemoryBackend, OpenFlags, StorageBackend};
pub use codec::{BlockDecoder, Codec, StoredDecoder, ZstdDecoder};
pub use config::FileOptions;
pub use error::{ErrorKind, ReadError, ReadResult};
pub use fetch::coalesce;
pub use option::{IoAdvice, ReadOption, ReadStats};
pub use reader::ByteSliceReader;
pub use retriever::{
    BlockData, BlockDataRetriever, CompressedLayout, CompressedRetriever, RawRetriever,
};
pub use scalar::{Scalar, ScalarKind};
pub use slice_list::{ByteSliceList, NodeId, SliceNode};
pub use telemetry::{GlobalTelemetry, NoopTelemetry, PerFileTelemetry, Telemetry, TelemetryTag};
