use super::{BackendFile, BlockRead, OpenFlags, StorageBackend};
use crate::option::IoAdvice;
use block_cache::BlockBuf;
use io_continuation::{Deferred, Executor, deferred_on};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// Files on the local filesystem.
///
/// Reads are positional, so one open file serves any number of concurrent
/// fetches. Block reads run on the executor passed with each call. On Linux a
/// run of blocks is read with `preadv` into the block buffers directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFsBackend;

impl LocalFsBackend {
    pub fn new() -> Self {
        Self
    }
}

impl StorageBackend for LocalFsBackend {
    fn length(&self, path: &Path) -> io::Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    fn open(&self, path: &Path, flags: OpenFlags) -> io::Result<Arc<dyn BackendFile>> {
        let file = File::open(path)?;
        debug!(path = %path.display(), direct_io = flags.direct_io, "opened local file");
        Ok(Arc::new(LocalFile {
            file: Arc::new(file),
            path: path.to_path_buf(),
            flags,
        }))
    }
}

struct LocalFile {
    file: Arc<File>,
    path: PathBuf,
    flags: OpenFlags,
}

impl BackendFile for LocalFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        pread(&self.file, buf, offset)
    }

    fn read_blocks_async(
        &self,
        mut bufs: Vec<BlockBuf>,
        offset: u64,
        advice: IoAdvice,
        executor: &Arc<dyn Executor>,
    ) -> Deferred<BlockRead> {
        let (promise, read) = deferred_on(executor.clone());
        let file = self.file.clone();
        let flags = self.flags;
        let path = self.path.clone();

        executor.schedule(Box::new(move || {
            let len: usize = bufs.iter().map(BlockBuf::capacity).sum();
            advise(&file, offset, len, advice);
            let result = read_blocks(&file, &mut bufs, offset);
            if flags.direct_io {
                // keep fetched blocks out of the page cache
                advise(&file, offset, len, IoAdvice::DontNeed);
            }
            trace!(path = %path.display(), offset, len, "local block read");
            promise.set(BlockRead { bufs, result });
        }));

        read
    }
}

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

/// Upper bound on iovecs per `preadv` call (Linux `UIO_MAXIOV`).
#[cfg(target_os = "linux")]
const MAX_IOVECS: usize = 1024;

/// Fill `bufs` in order from `offset`, one `preadv` per up to
/// [`MAX_IOVECS`] buffers. Stops early at end of file.
#[cfg(target_os = "linux")]
fn read_blocks(file: &File, bufs: &mut [BlockBuf], offset: u64) -> io::Result<usize> {
    use std::os::unix::io::AsRawFd;

    let mut filled = vec![0usize; bufs.len()];
    let mut total = 0usize;
    let mut next = 0;
    loop {
        while next < bufs.len() && filled[next] == bufs[next].capacity() {
            next += 1;
        }
        if next == bufs.len() {
            break;
        }

        let iovecs: Vec<libc::iovec> = bufs[next..]
            .iter_mut()
            .zip(&filled[next..])
            .take(MAX_IOVECS)
            .map(|(buf, &done)| {
                let space = &mut buf.space_mut()[done..];
                libc::iovec {
                    iov_base: space.as_mut_ptr().cast(),
                    iov_len: space.len(),
                }
            })
            .collect();

        // SAFETY: every iovec points into a distinct buffer in `bufs`, which
        // outlives the call and is not otherwise touched until it returns.
        let ret = unsafe {
            libc::preadv(
                file.as_raw_fd(),
                iovecs.as_ptr(),
                iovecs.len() as libc::c_int,
                (offset + total as u64) as libc::off_t,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if ret == 0 {
            break;
        }

        let mut n = ret as usize;
        total += n;
        let mut i = next;
        while n > 0 {
            let take = n.min(bufs[i].capacity() - filled[i]);
            filled[i] += take;
            n -= take;
            i += 1;
        }
    }

    for (buf, len) in bufs.iter_mut().zip(filled) {
        buf.set_len(len);
    }
    Ok(total)
}

#[cfg(not(target_os = "linux"))]
fn read_blocks(file: &File, bufs: &mut [BlockBuf], offset: u64) -> io::Result<usize> {
    super::gather_read(bufs, offset, |buf, at| pread(file, buf, at))
}

#[cfg(target_os = "linux")]
fn advise(file: &File, offset: u64, len: usize, advice: IoAdvice) {
    use std::os::unix::io::AsRawFd;

    let advice = match advice {
        IoAdvice::Normal => return,
        IoAdvice::Sequential => libc::POSIX_FADV_SEQUENTIAL,
        IoAdvice::Random => libc::POSIX_FADV_RANDOM,
        IoAdvice::WillNeed => libc::POSIX_FADV_WILLNEED,
        IoAdvice::DontNeed => libc::POSIX_FADV_DONTNEED,
    };
    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    let ret = unsafe {
        libc::posix_fadvise(
            file.as_raw_fd(),
            offset as libc::off_t,
            len as libc::off_t,
            advice,
        )
    };
    if ret != 0 {
        trace!(errno = ret, "posix_fadvise failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn advise(_file: &File, _offset: u64, _len: usize, _advice: IoAdvice) {}
