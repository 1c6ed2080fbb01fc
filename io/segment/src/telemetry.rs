//! Read path telemetry.
//!
//! Accessors report through a [`Telemetry`] sink keyed by a [`TelemetryTag`]
//! derived from the file path. [`GlobalTelemetry`] feeds process-wide
//! metriken metrics, [`PerFileTelemetry`] keeps counters per tag, and
//! [`NoopTelemetry`] drops everything.

use crate::error::ErrorKind;
use ahash::AHashMap;
use metriken::{AtomicHistogram, Counter, metric};
use parking_lot::RwLock;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

#[metric(name = "segment_block_hits", description = "Block lookups served from the cache")]
pub static BLOCK_HITS: Counter = Counter::new();

#[metric(name = "segment_block_misses", description = "Block lookups that missed the cache")]
pub static BLOCK_MISSES: Counter = Counter::new();

#[metric(name = "segment_backend_reads", description = "Backend read calls issued")]
pub static BACKEND_READS: Counter = Counter::new();

#[metric(name = "segment_backend_blocks", description = "Blocks fetched from the backend")]
pub static BACKEND_BLOCKS: Counter = Counter::new();

#[metric(name = "segment_backend_bytes", description = "Bytes fetched from the backend")]
pub static BACKEND_BYTES: Counter = Counter::new();

#[metric(name = "segment_read_errors", description = "Reads that returned an error")]
pub static READ_ERRORS: Counter = Counter::new();

#[metric(
    name = "segment_fetch_latency",
    description = "Backend fetch latency histogram (nanoseconds)"
)]
pub static FETCH_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(
    name = "segment_read_latency",
    description = "Read latency histogram (nanoseconds)"
)]
pub static READ_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(name = "segment_read_size", description = "Read size histogram (bytes)")]
pub static READ_SIZE: AtomicHistogram = AtomicHistogram::new(7, 64);

/// Opaque per-file key for telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TelemetryTag(Arc<str>);

impl TelemetryTag {
    pub fn new(tag: &str) -> Self {
        Self(Arc::from(tag))
    }

    /// Tag a file by its name, or the whole path when it has none.
    pub fn from_path(path: &Path) -> Self {
        match path.file_name() {
            Some(name) => Self::new(&name.to_string_lossy()),
            None => Self::new(&path.to_string_lossy()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TelemetryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sink for read path events.
pub trait Telemetry: Send + Sync {
    fn record_lookup(&self, tag: &TelemetryTag, hits: u64, misses: u64);

    fn record_fetch(&self, tag: &TelemetryTag, blocks: u64, bytes: u64, latency: Duration);

    fn record_read(&self, tag: &TelemetryTag, bytes: u64, latency: Duration);

    fn record_error(&self, _tag: &TelemetryTag, _kind: ErrorKind) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn record_lookup(&self, _: &TelemetryTag, _: u64, _: u64) {}

    fn record_fetch(&self, _: &TelemetryTag, _: u64, _: u64, _: Duration) {}

    fn record_read(&self, _: &TelemetryTag, _: u64, _: Duration) {}
}

/// Feeds the process-wide metriken metrics in this module.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalTelemetry;

impl Telemetry for GlobalTelemetry {
    fn record_lookup(&self, _tag: &TelemetryTag, hits: u64, misses: u64) {
        BLOCK_HITS.add(hits);
        BLOCK_MISSES.add(misses);
    }

    fn record_fetch(&self, tag: &TelemetryTag, blocks: u64, bytes: u64, latency: Duration) {
        BACKEND_READS.increment();
        BACKEND_BLOCKS.add(blocks);
        BACKEND_BYTES.add(bytes);
        let _ = FETCH_LATENCY.increment(latency.as_nanos() as u64);
        trace!(
            file = %tag,
            blocks,
            bytes,
            latency_ns = latency.as_nanos() as u64,
            "fetch complete"
        );
    }

    fn record_read(&self, _tag: &TelemetryTag, bytes: u64, latency: Duration) {
        let _ = READ_LATENCY.increment(latency.as_nanos() as u64);
        let _ = READ_SIZE.increment(bytes);
    }

    fn record_error(&self, _tag: &TelemetryTag, _kind: ErrorKind) {
        READ_ERRORS.increment();
    }
}

/// Counters for one tag in [`PerFileTelemetry`].
#[derive(Debug, Default)]
pub struct FileCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub fetches: AtomicU64,
    pub fetched_blocks: AtomicU64,
    pub fetched_bytes: AtomicU64,
    pub reads: AtomicU64,
    pub read_bytes: AtomicU64,
    pub errors: AtomicU64,
}

/// Keeps separate counters for every tag it sees.
#[derive(Debug, Default)]
pub struct PerFileTelemetry {
    files: RwLock<AHashMap<TelemetryTag, Arc<FileCounters>>>,
}

impl PerFileTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for `tag`, if it has reported anything.
    pub fn get(&self, tag: &TelemetryTag) -> Option<Arc<FileCounters>> {
        self.files.read().get(tag).cloned()
    }

    fn counters(&self, tag: &TelemetryTag) -> Arc<FileCounters> {
        if let Some(counters) = self.files.read().get(tag) {
            return counters.clone();
        }
        self.files.write().entry(tag.clone()).or_default().clone()
    }
}

impl Telemetry for PerFileTelemetry {
    fn record_lookup(&self, tag: &TelemetryTag, hits: u64, misses: u64) {
        let counters = self.counters(tag);
        counters.hits.fetch_add(hits, Ordering::Relaxed);
        counters.misses.fetch_add(misses, Ordering::Relaxed);
    }

    fn record_fetch(&self, tag: &TelemetryTag, blocks: u64, bytes: u64, _latency: Duration) {
        let counters = self.counters(tag);
        counters.fetches.fetch_add(1, Ordering::Relaxed);
        counters.fetched_blocks.fetch_add(blocks, Ordering::Relaxed);
        counters.fetched_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_read(&self, tag: &TelemetryTag, bytes: u64, _latency: Duration) {
        let counters = self.counters(tag);
        counters.reads.fetch_add(1, Ordering::Relaxed);
        counters.read_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_error(&self, tag: &TelemetryTag, _kind: ErrorKind) {
        self.counters(tag).errors.fetch_add(1, Ordering::Relaxed);
    }
}
