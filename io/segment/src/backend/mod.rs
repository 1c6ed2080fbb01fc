//! Storage backend boundary.
//!
//! The accessor only needs two things from storage: the length of a file and
//! a handle that can read a run of contiguous blocks in one call.
//! [`LocalFsBackend`] serves local files; [`MemoryBackend`] serves in-memory
//! files and records every call, for tests and benchmarks.

mod local;
mod memory;

pub use local::LocalFsBackend;
pub use memory::{MemoryBackend, ReadCall};

use crate::option::IoAdvice;
use block_cache::BlockBuf;
use io_continuation::{Deferred, Executor};
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Flags for [`StorageBackend::open`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Bypass the OS page cache where the backend can.
    pub direct_io: bool,
}

/// Completion of [`BackendFile::read_blocks_async`].
///
/// The buffers always come back, whatever the result, so the caller can
/// return them to the allocator.
#[derive(Debug)]
pub struct BlockRead {
    pub bufs: Vec<BlockBuf>,
    /// Total bytes read, short only at end of file.
    pub result: io::Result<usize>,
}

/// A storage system that can open files.
pub trait StorageBackend: Send + Sync {
    fn length(&self, path: &Path) -> io::Result<u64>;

    fn open(&self, path: &Path, flags: OpenFlags) -> io::Result<Arc<dyn BackendFile>>;
}

/// An open, immutable file.
pub trait BackendFile: Send + Sync {
    /// Positional read. Returns 0 at end of file.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Fill `bufs` in order with the bytes starting at `offset`, as one
    /// backend call, completing on `executor`.
    fn read_blocks_async(
        &self,
        bufs: Vec<BlockBuf>,
        offset: u64,
        advice: IoAdvice,
        executor: &Arc<dyn Executor>,
    ) -> Deferred<BlockRead>;
}

/// Read into consecutive buffers until they are full or `read_at` hits end of
/// file. Sets each buffer's length to what it received.
pub(crate) fn gather_read(
    bufs: &mut [BlockBuf],
    offset: u64,
    mut read_at: impl FnMut(&mut [u8], u64) -> io::Result<usize>,
) -> io::Result<usize> {
    let mut total = 0usize;
    let mut eof = false;
    for buf in bufs.iter_mut() {
        let mut filled = 0;
        if !eof {
            let space = buf.space_mut();
            while filled < space.len() {
                match read_at(&mut space[filled..], offset + (total + filled) as u64) {
                    Ok(0) => {
                        eof = true;
                        break;
                    }
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
        }
        buf.set_len(filled);
        total += filled;
    }
    Ok(total)
}
