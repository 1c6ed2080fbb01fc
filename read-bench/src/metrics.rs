//! Benchmark metrics.
//!
//! Block hit and miss counts come from the reader's own metrics in
//! [`segment_reader::telemetry`].

use metriken::{AtomicHistogram, Counter, metric};

pub use segment_reader::telemetry::{BACKEND_READS, BLOCK_HITS, BLOCK_MISSES};

// Operation counters
#[metric(name = "read_count", description = "Total single reads")]
pub static READ_COUNT: Counter = Counter::new();

#[metric(name = "batch_count", description = "Total ordered batch reads")]
pub static BATCH_COUNT: Counter = Counter::new();

#[metric(name = "stream_count", description = "Total slice list scans")]
pub static STREAM_COUNT: Counter = Counter::new();

#[metric(name = "completed_count", description = "Total completed operations")]
pub static COMPLETED_COUNT: Counter = Counter::new();

#[metric(name = "op_errors", description = "Operations that returned an error")]
pub static OP_ERRORS: Counter = Counter::new();

#[metric(name = "bytes_read", description = "Bytes returned to callers")]
pub static BYTES_READ: Counter = Counter::new();

// Latency histograms
#[metric(
    name = "response_latency",
    description = "Operation latency histogram (nanoseconds)"
)]
pub static RESPONSE_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(name = "read_latency", description = "Single read latency histogram (nanoseconds)")]
pub static READ_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(
    name = "batch_latency",
    description = "Batch read latency histogram (nanoseconds)"
)]
pub static BATCH_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(
    name = "stream_latency",
    description = "Slice list scan latency histogram (nanoseconds)"
)]
pub static STREAM_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);
