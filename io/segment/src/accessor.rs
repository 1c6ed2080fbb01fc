//! Block-cached random access to one immutable file.
//!
//! A [`FileAccessor`] turns byte ranges into block lookups against the shared
//! [`BlockCache`]. Blocks that miss are grouped into runs of adjacent indices
//! (see [`coalesce`]) and each run is fetched with one backend call. Every
//! run is dispatched before any of them is awaited, so a read that misses in
//! several places pays roughly one round trip.
//!
//! Concurrent callers that miss on the same block share one fetch: the first
//! one holds the cache reservation and the others wait for it to be filled.
//!
//! The async methods suspend at each fetch and wait. The synchronous methods
//! drive them with [`block_on`] and refuse to run on a thread of the executor
//! the backend completes on.

use crate::backend::{BackendFile, BlockRead, OpenFlags, StorageBackend};
use crate::config::FileOptions;
use crate::error::{ReadError, ReadResult};
use crate::fetch::coalesce;
use crate::option::ReadOption;
use crate::telemetry::{GlobalTelemetry, Telemetry, TelemetryTag};
use block_cache::{BlockCache, BlockHandle, BlockId, FillFailure, Lookup, Reservation};
use io_continuation::{Canceled, Deferred, block_on};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// A waiter whose fetcher gave up without an I/O result retries the fetch
/// itself, at most this many lookup rounds in total.
const MAX_LOOKUP_ROUNDS: usize = 3;

/// One destination of [`FileAccessor::batch_read_ordered`].
#[derive(Debug)]
pub struct ReadRequest<'a> {
    pub offset: u64,
    pub buf: &'a mut [u8],
}

impl<'a> ReadRequest<'a> {
    pub fn new(offset: u64, buf: &'a mut [u8]) -> Self {
        Self { offset, buf }
    }
}

struct FetchGroup {
    reservations: Vec<Reservation>,
    read: Deferred<BlockRead>,
    started: Instant,
}

type Resolved = BTreeMap<u64, ReadResult<BlockHandle>>;

/// Cached, read-only view of one file.
pub struct FileAccessor {
    path: PathBuf,
    file_id: u64,
    length: u64,
    block_size: usize,
    options: FileOptions,
    file: Arc<dyn BackendFile>,
    cache: BlockCache,
    telemetry: Arc<dyn Telemetry>,
    tag: TelemetryTag,
}

impl FileAccessor {
    /// Open `path` on `backend`, caching its blocks in `cache`.
    pub fn open(
        path: impl AsRef<Path>,
        backend: &dyn StorageBackend,
        cache: BlockCache,
        options: FileOptions,
    ) -> ReadResult<Self> {
        options.validate()?;
        let path = path.as_ref();
        let length = backend.length(path)?;
        let file = backend.open(
            path,
            OpenFlags {
                direct_io: options.direct_io,
            },
        )?;
        let file_id = cache.namespace(&path.to_string_lossy());
        let block_size = cache.block_size();

        debug!(
            path = %path.display(),
            length,
            file_id,
            block_size,
            batch_size = options.batch_size,
            "opened segment file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file_id,
            length,
            block_size,
            options,
            file,
            cache,
            telemetry: Arc::new(GlobalTelemetry),
            tag: TelemetryTag::from_path(path),
        })
    }

    /// Report to `telemetry` instead of the global metrics.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cache namespace of this file's blocks.
    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    /// File length in bytes.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> u64 {
        self.length.div_ceil(self.block_size as u64)
    }

    pub fn options(&self) -> &FileOptions {
        &self.options
    }

    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    pub fn tag(&self) -> &TelemetryTag {
        &self.tag
    }

    #[inline]
    fn block_id(&self, index: u64) -> BlockId {
        BlockId::new(self.file_id, index)
    }

    /// Valid bytes in block `index`; only the last block is short.
    fn block_len(&self, index: u64) -> usize {
        let start = index * self.block_size as u64;
        (self.length.saturating_sub(start)).min(self.block_size as u64) as usize
    }

    /// Blocks covering `[offset, offset + len)`.
    fn block_range(&self, offset: u64, len: usize) -> Range<u64> {
        if len == 0 {
            return 0..0;
        }
        let block_size = self.block_size as u64;
        offset / block_size..(offset + len as u64 - 1) / block_size + 1
    }

    /// Length of a read at `offset` after clamping to end of file.
    fn clamp(&self, offset: u64, len: usize) -> ReadResult<usize> {
        if offset >= self.length {
            return Err(ReadError::BadArgument(format!(
                "offset {offset} at or beyond end of file ({} bytes)",
                self.length
            )));
        }
        Ok((len as u64).min(self.length - offset) as usize)
    }

    fn observe<T>(&self, result: ReadResult<T>) -> ReadResult<T> {
        if let Err(e) = &result {
            self.telemetry.record_error(&self.tag, e.kind());
        }
        result
    }

    /// Read into `buf` from `offset`. Returns `min(buf.len(), len - offset)`.
    pub fn read(&self, buf: &mut [u8], offset: u64, opt: &ReadOption) -> ReadResult<usize> {
        block_on(self.read_async(buf, offset, opt), Some(&*opt.executor))?
    }

    pub async fn read_async(
        &self,
        buf: &mut [u8],
        offset: u64,
        opt: &ReadOption,
    ) -> ReadResult<usize> {
        let started = Instant::now();
        let result = self.read_inner(buf, offset, opt).await;
        if let Ok(n) = result {
            self.telemetry.record_read(&self.tag, n as u64, started.elapsed());
        }
        self.observe(result)
    }

    async fn read_inner(&self, buf: &mut [u8], offset: u64, opt: &ReadOption) -> ReadResult<usize> {
        let len = self.clamp(offset, buf.len())?;
        if len == 0 {
            return Ok(0);
        }

        let indices: Vec<u64> = self.block_range(offset, len).collect();
        let handles = self.get_block_handles_async(&indices, opt).await;

        let dst = &mut buf[..len];
        let mut copied = 0;
        for (index, handle) in indices.iter().zip(handles) {
            let handle = handle?;
            copied += scatter(handle.data(), index * self.block_size as u64, dst, offset);
        }
        if copied != len {
            return Err(ReadError::Corrupted(format!(
                "assembled {copied} of {len} bytes at offset {offset}"
            )));
        }
        Ok(len)
    }

    /// Pinned handles for block `indices`, aligned with the input.
    ///
    /// Indices may repeat and need not be sorted. A failed fetch only fails
    /// the entries of the blocks it covered.
    pub fn get_block_handles(
        &self,
        indices: &[u64],
        opt: &ReadOption,
    ) -> Vec<ReadResult<BlockHandle>> {
        match block_on(self.get_block_handles_async(indices, opt), Some(&*opt.executor)) {
            Ok(handles) => handles,
            Err(e) => vec![Err(e.into()); indices.len()],
        }
    }

    pub async fn get_block_handles_async(
        &self,
        indices: &[u64],
        opt: &ReadOption,
    ) -> Vec<ReadResult<BlockHandle>> {
        let deadline = opt.deadline();
        let mut unique = indices.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let mut resolved = Resolved::new();
        let block_count = self.block_count();
        let mut wanted = Vec::with_capacity(unique.len());
        for index in unique {
            if index < block_count {
                wanted.push(index);
            } else {
                resolved.insert(
                    index,
                    Err(ReadError::BadArgument(format!(
                        "block {index} beyond end of file ({block_count} blocks)"
                    ))),
                );
            }
        }

        let mut round = 0;
        while !wanted.is_empty() {
            round += 1;
            let mut reserved = Vec::new();
            let mut waiting = Vec::new();
            let (mut hits, mut misses) = (0u64, 0u64);

            for &index in &wanted {
                match self.cache.lookup(self.block_id(index)) {
                    Lookup::Hit(handle) => {
                        hits += 1;
                        resolved.insert(index, Ok(handle));
                    }
                    Lookup::Pending(pending) => {
                        misses += 1;
                        waiting.push((index, pending));
                    }
                    Lookup::Miss(reservation) => {
                        misses += 1;
                        reserved.push(reservation);
                    }
                }
            }
            opt.record_lookup(hits, misses);
            self.telemetry.record_lookup(&self.tag, hits, misses);

            for group in self.dispatch(reserved, deadline, opt, &mut resolved) {
                self.complete(group, opt, &mut resolved).await;
            }

            wanted.clear();
            for (index, pending) in waiting {
                match pending.await {
                    Ok(Ok(handle)) => {
                        resolved.insert(index, Ok(handle));
                    }
                    Ok(Err(FillFailure::Canceled | FillFailure::Timeout)) | Err(Canceled)
                        if round < MAX_LOOKUP_ROUNDS =>
                    {
                        wanted.push(index);
                    }
                    Ok(Err(failure)) => {
                        resolved.insert(index, Err(ReadError::from_fill(failure)));
                    }
                    Err(canceled) => {
                        resolved.insert(index, Err(canceled.into()));
                    }
                }
            }
        }

        indices
            .iter()
            .map(|index| match resolved.get(index) {
                Some(result) => result.clone(),
                None => Err(ReadError::Corrupted(format!("block {index} was not resolved"))),
            })
            .collect()
    }

    /// Issue one backend call per run of reserved blocks. Runs whose time
    /// budget is already spent fail without I/O.
    fn dispatch(
        &self,
        reserved: Vec<Reservation>,
        deadline: Option<Instant>,
        opt: &ReadOption,
        resolved: &mut Resolved,
    ) -> Vec<FetchGroup> {
        let indices: Vec<u64> = reserved.iter().map(|r| r.id().index).collect();
        let mut reserved = reserved.into_iter();
        let mut groups = Vec::new();

        for run in coalesce(&indices, self.options.batch_size) {
            let first = indices[run.start];
            let reservations: Vec<Reservation> = reserved.by_ref().take(run.len()).collect();

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                debug!(
                    file = %self.tag,
                    first,
                    blocks = run.len(),
                    "time budget spent before dispatch"
                );
                for reservation in reservations {
                    resolved.insert(reservation.id().index, Err(ReadError::OperationTimeout));
                    reservation.abandon(FillFailure::Timeout);
                }
                continue;
            }

            let bufs = (0..run.len()).map(|_| self.cache.allocator().alloc()).collect();
            let offset = first * self.block_size as u64;
            trace!(
                file = %self.tag,
                first,
                blocks = run.len(),
                offset,
                "dispatching fetch group"
            );
            opt.record_io_call();
            groups.push(FetchGroup {
                reservations,
                read: self.file.read_blocks_async(bufs, offset, opt.advice, &opt.executor),
                started: Instant::now(),
            });
        }

        groups
    }

    /// Wait for one fetch and fill (or fail) its reservations.
    async fn complete(&self, group: FetchGroup, opt: &ReadOption, resolved: &mut Resolved) {
        let FetchGroup {
            reservations,
            read,
            started,
        } = group;
        let first = reservations.first().map(|r| r.id().index).unwrap_or_default();
        let blocks = reservations.len();
        let expected: usize = reservations
            .iter()
            .map(|r| self.block_len(r.id().index))
            .sum();

        let outcome = match read.await {
            Ok(BlockRead {
                bufs,
                result: Ok(n),
            }) if n >= expected && bufs.len() == blocks => Ok(bufs),
            Ok(BlockRead { bufs, result }) => {
                for buf in bufs {
                    self.cache.allocator().free(buf);
                }
                Err(match result {
                    Ok(n) => ReadError::Corrupted(format!(
                        "fetch of blocks {first}..{} returned {n} of {expected} bytes",
                        first + blocks as u64
                    )),
                    Err(e) => e.into(),
                })
            }
            Err(canceled) => Err(canceled.into()),
        };

        match outcome {
            Ok(bufs) => {
                self.telemetry
                    .record_fetch(&self.tag, blocks as u64, expected as u64, started.elapsed());
                opt.record_fetched(expected as u64);
                for (reservation, mut buf) in reservations.into_iter().zip(bufs) {
                    let index = reservation.id().index;
                    buf.set_len(self.block_len(index));
                    resolved.insert(index, Ok(reservation.fill(buf, self.options.priority)));
                }
            }
            Err(e) => {
                warn!(file = %self.tag, first, blocks, error = %e, "block fetch failed");
                let failure = e.fill_failure();
                for reservation in reservations {
                    resolved.insert(reservation.id().index, Err(e.clone()));
                    reservation.abandon(failure);
                }
            }
        }
    }

    /// Serve several reads with one block lookup pass.
    ///
    /// `requests` must be sorted by offset. Results line up with `requests`;
    /// a request overlapping a failed block gets that block's error.
    pub fn batch_read_ordered(
        &self,
        requests: &mut [ReadRequest<'_>],
        opt: &ReadOption,
    ) -> Vec<ReadResult<usize>> {
        let count = requests.len();
        match block_on(self.batch_read_ordered_async(requests, opt), Some(&*opt.executor)) {
            Ok(results) => results,
            Err(e) => vec![Err(e.into()); count],
        }
    }

    pub async fn batch_read_ordered_async(
        &self,
        requests: &mut [ReadRequest<'_>],
        opt: &ReadOption,
    ) -> Vec<ReadResult<usize>> {
        debug_assert!(
            requests.windows(2).all(|w| w[0].offset <= w[1].offset),
            "batch requests must be sorted by offset"
        );
        let started = Instant::now();

        let spans: Vec<ReadResult<usize>> = requests
            .iter()
            .map(|request| self.clamp(request.offset, request.buf.len()))
            .collect();
        let mut wanted = BTreeSet::new();
        for (request, span) in requests.iter().zip(&spans) {
            if let Ok(len) = span {
                wanted.extend(self.block_range(request.offset, *len));
            }
        }
        let indices: Vec<u64> = wanted.into_iter().collect();
        let handles = self.get_block_handles_async(&indices, opt).await;

        let mut filled = vec![0usize; requests.len()];
        let mut failed: Vec<Option<ReadError>> = vec![None; requests.len()];
        for (index, handle) in indices.iter().zip(&handles) {
            let block_start = index * self.block_size as u64;
            let block_end = block_start + self.block_len(*index) as u64;
            for (i, request) in requests.iter_mut().enumerate() {
                if request.offset >= block_end {
                    break;
                }
                let Ok(len) = &spans[i] else {
                    continue;
                };
                if request.offset + *len as u64 <= block_start {
                    continue;
                }
                match handle {
                    Ok(handle) => {
                        filled[i] += scatter(
                            handle.data(),
                            block_start,
                            &mut request.buf[..*len],
                            request.offset,
                        );
                    }
                    Err(e) => {
                        if failed[i].is_none() {
                            failed[i] = Some(e.clone());
                        }
                    }
                }
            }
        }

        let results: Vec<ReadResult<usize>> = spans
            .into_iter()
            .enumerate()
            .map(|(i, span)| {
                let len = span?;
                if let Some(e) = failed[i].take() {
                    return Err(e);
                }
                if filled[i] != len {
                    return Err(ReadError::Corrupted(format!(
                        "assembled {} of {len} bytes for batch request {i}",
                        filled[i]
                    )));
                }
                Ok(len)
            })
            .map(|result| self.observe(result))
            .collect();

        let bytes: usize = results.iter().filter_map(|r| r.as_ref().ok()).sum();
        self.telemetry.record_read(&self.tag, bytes as u64, started.elapsed());
        results
    }

    /// Warm the cache with the blocks covering `[offset, offset + length)`.
    pub fn prefetch(&self, length: usize, offset: u64, opt: &ReadOption) -> ReadResult<()> {
        block_on(self.prefetch_async(length, offset, opt), Some(&*opt.executor))?
    }

    pub async fn prefetch_async(
        &self,
        length: usize,
        offset: u64,
        opt: &ReadOption,
    ) -> ReadResult<()> {
        let len = self.clamp(offset, length)?;
        let indices: Vec<u64> = self.block_range(offset, len).collect();
        for result in self.get_block_handles_async(&indices, opt).await {
            self.observe(result)?;
        }
        Ok(())
    }

    /// Segment files are immutable.
    pub fn write(&self, _buf: &[u8], _offset: u64) -> ReadResult<usize> {
        Err(ReadError::NotSupported("write to a read-only cached file"))
    }
}

impl std::fmt::Debug for FileAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAccessor")
            .field("path", &self.path)
            .field("file_id", &self.file_id)
            .field("length", &self.length)
            .field("block_size", &self.block_size)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Copy the overlap of `block` (at file offset `block_start`) and `dst` (at
/// file offset `dst_start`) into `dst`. Returns the bytes copied.
fn scatter(block: &[u8], block_start: u64, dst: &mut [u8], dst_start: u64) -> usize {
    let start = block_start.max(dst_start);
    let end = (block_start + block.len() as u64).min(dst_start + dst.len() as u64);
    if start >= end {
        return 0;
    }
    let len = (end - start) as usize;
    let src = (start - block_start) as usize;
    let at = (start - dst_start) as usize;
    dst[at..at + len].copy_from_slice(&block[src..src + len]);
    len
}
