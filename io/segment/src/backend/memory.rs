use super::{BackendFile, BlockRead, OpenFlags, StorageBackend, gather_read};
use crate::option::IoAdvice;
use ahash::AHashMap;
use block_cache::BlockBuf;
use io_continuation::{Deferred, Executor, deferred_on};
use parking_lot::{Mutex, RwLock};
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// One recorded [`BackendFile::read_blocks_async`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCall {
    pub path: PathBuf,
    pub offset: u64,
    /// Bytes requested (sum of buffer capacities).
    pub len: usize,
    pub advice: IoAdvice,
}

#[derive(Default)]
struct Faults {
    /// Reads overlapping these ranges fail.
    fail: Vec<Range<u64>>,
    /// Reads overlapping these ranges come back one byte short.
    truncate: Vec<Range<u64>>,
    delay: Option<Duration>,
}

#[derive(Default)]
struct Shared {
    files: RwLock<AHashMap<PathBuf, Arc<[u8]>>>,
    calls: Mutex<Vec<ReadCall>>,
    faults: RwLock<AHashMap<PathBuf, Faults>>,
}

/// In-memory files with call recording and fault injection.
///
/// Cloning shares the files, the call log and the faults.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file.
    pub fn insert(&self, path: impl Into<PathBuf>, data: impl Into<Arc<[u8]>>) {
        self.shared.files.write().insert(path.into(), data.into());
    }

    /// Every block read issued so far, in issue order.
    pub fn read_calls(&self) -> Vec<ReadCall> {
        self.shared.calls.lock().clone()
    }

    pub fn read_call_count(&self) -> usize {
        self.shared.calls.lock().len()
    }

    pub fn clear_calls(&self) {
        self.shared.calls.lock().clear();
    }

    /// Fail block reads of `path` that overlap `range`.
    pub fn fail_reads(&self, path: impl Into<PathBuf>, range: Range<u64>) {
        self.shared.faults.write().entry(path.into()).or_default().fail.push(range);
    }

    /// Return one byte less than available for block reads of `path` that
    /// overlap `range`.
    pub fn truncate_reads(&self, path: impl Into<PathBuf>, range: Range<u64>) {
        self.shared
            .faults
            .write()
            .entry(path.into())
            .or_default()
            .truncate
            .push(range);
    }

    /// Sleep this long inside every block read of `path`.
    pub fn delay_reads(&self, path: impl Into<PathBuf>, delay: Duration) {
        self.shared.faults.write().entry(path.into()).or_default().delay = Some(delay);
    }

    pub fn clear_faults(&self) {
        self.shared.faults.write().clear();
    }
}

impl StorageBackend for MemoryBackend {
    fn length(&self, path: &Path) -> io::Result<u64> {
        self.shared
            .files
            .read()
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| not_found(path))
    }

    fn open(&self, path: &Path, _flags: OpenFlags) -> io::Result<Arc<dyn BackendFile>> {
        let data = self
            .shared
            .files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))?;
        Ok(Arc::new(MemoryFile {
            path: path.to_path_buf(),
            data,
            shared: self.shared.clone(),
        }))
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", path.display()))
}

fn overlaps(range: &Range<u64>, start: u64, end: u64) -> bool {
    range.start < end && start < range.end
}

struct MemoryFile {
    path: PathBuf,
    data: Arc<[u8]>,
    shared: Arc<Shared>,
}

impl BackendFile for MemoryFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let start = (offset as usize).min(self.data.len());
        let end = start.saturating_add(buf.len()).min(self.data.len());
        buf[..end - start].copy_from_slice(&self.data[start..end]);
        Ok(end - start)
    }

    fn read_blocks_async(
        &self,
        mut bufs: Vec<BlockBuf>,
        offset: u64,
        advice: IoAdvice,
        executor: &Arc<dyn Executor>,
    ) -> Deferred<BlockRead> {
        let len: usize = bufs.iter().map(BlockBuf::capacity).sum();
        self.shared.calls.lock().push(ReadCall {
            path: self.path.clone(),
            offset,
            len,
            advice,
        });

        let end = offset + len as u64;
        let (fail, truncate, delay) = match self.shared.faults.read().get(&self.path) {
            Some(faults) => (
                faults.fail.iter().any(|r| overlaps(r, offset, end)),
                faults.truncate.iter().any(|r| overlaps(r, offset, end)),
                faults.delay,
            ),
            None => (false, false, None),
        };

        let (promise, read) = deferred_on(executor.clone());
        let data = self.data.clone();
        executor.schedule(Box::new(move || {
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            let result = if fail {
                Err(io::Error::other(format!("injected read failure at offset {offset}")))
            } else {
                let available = data.len().saturating_sub(offset as usize).min(len);
                let limit = if truncate {
                    available.saturating_sub(1)
                } else {
                    available
                };
                let visible = &data[..(offset as usize).min(data.len()) + limit];
                gather_read(&mut bufs, offset, |buf, at| {
                    let start = (at as usize).min(visible.len());
                    let end = (start + buf.len()).min(visible.len());
                    buf[..end - start].copy_from_slice(&visible[start..end]);
                    Ok(end - start)
                })
            };
            promise.set(BlockRead { bufs, result });
        }));

        read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use block_cache::BlockAllocator;
    use io_continuation::Inline;

    fn read(backend: &MemoryBackend, path: &str, blocks: usize, offset: u64) -> BlockRead {
        let allocator = BlockAllocator::new(4, 64).unwrap();
        let file = backend.open(Path::new(path), OpenFlags::default()).unwrap();
        let bufs = (0..blocks).map(|_| allocator.alloc()).collect();
        let inline: Arc<dyn Executor> = Arc::new(Inline);
        file.read_blocks_async(bufs, offset, IoAdvice::Normal, &inline)
            .wait()
            .unwrap()
    }

    #[test]
    fn test_records_calls() {
        let backend = MemoryBackend::new();
        backend.insert("/f", b"abcdefghi".to_vec());
        assert_eq!(backend.length(Path::new("/f")).unwrap(), 9);

        let result = read(&backend, "/f", 3, 0);
        assert_eq!(result.result.unwrap(), 9);
        assert_eq!(result.bufs[2].as_slice(), b"i");
        assert_eq!(
            backend.read_calls(),
            vec![ReadCall {
                path: PathBuf::from("/f"),
                offset: 0,
                len: 12,
                advice: IoAdvice::Normal,
            }]
        );
    }

    #[test]
    fn test_missing_file() {
        let backend = MemoryBackend::new();
        let err = backend.length(Path::new("/missing")).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(backend.open(Path::new("/missing"), OpenFlags::default()).is_err());
    }

    #[test]
    fn test_injected_faults() {
        let backend = MemoryBackend::new();
        backend.insert("/f", vec![7u8; 16]);
        backend.fail_reads("/f", 4..5);
        backend.truncate_reads("/f", 12..16);

        assert!(read(&backend, "/f", 1, 0).result.is_ok());
        assert!(read(&backend, "/f", 1, 4).result.is_err());
        assert_eq!(read(&backend, "/f", 1, 12).result.unwrap(), 3);

        backend.clear_faults();
        assert_eq!(read(&backend, "/f", 1, 12).result.unwrap(), 4);
    }
}
