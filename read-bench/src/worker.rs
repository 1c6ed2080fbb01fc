//! Worker thread driving reads against one file.

use crate::config::Config;
use crate::metrics;

use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use segment_reader::{
    ByteSliceList, ByteSliceReader, FileAccessor, RawRetriever, ReadOption, ReadRequest,
};
use std::io::Read;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::warn;

/// Test phase, controlled by main thread and read by workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Each worker prefetches its share of the file once.
    Prefill = 0,
    /// Run the workload without recording metrics.
    Warmup = 1,
    /// Main measurement phase.
    Running = 2,
    /// Workers exit.
    Stop = 3,
}

impl Phase {
    #[inline]
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Phase::Prefill,
            1 => Phase::Warmup,
            2 => Phase::Running,
            _ => Phase::Stop,
        }
    }
}

/// Shared state between main thread and workers.
pub struct SharedState {
    phase: AtomicU8,
    prefill_complete: AtomicUsize,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Prefill as u8),
            prefill_complete: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn mark_prefill_complete(&self) {
        self.prefill_complete.fetch_add(1, Ordering::Release);
    }

    pub fn prefill_complete_count(&self) -> usize {
        self.prefill_complete.load(Ordering::Acquire)
    }
}

/// Byte range of the file worker `id` of `workers` prefetches.
pub fn prefill_range(file_len: u64, block_size: usize, id: usize, workers: usize) -> Range<u64> {
    let blocks = file_len.div_ceil(block_size as u64);
    let per_worker = blocks.div_ceil(workers as u64);
    let start = (id as u64 * per_worker * block_size as u64).min(file_len);
    let end = ((id as u64 + 1) * per_worker * block_size as u64).min(file_len);
    start..end
}

/// Run a single worker thread.
pub fn run_worker(
    id: usize,
    config: &Config,
    file: &Arc<FileAccessor>,
    opt: &ReadOption,
    shared: &SharedState,
    prefill: Option<Range<u64>>,
) {
    let read_size = config.workload.read_size;
    let stream_size = read_size * 4;
    let batch_requests = config.workload.batch_requests;
    let read_threshold = config.workload.mix.read;
    let batch_threshold = read_threshold + config.workload.mix.batch;
    let max_offset = file.len().saturating_sub(read_size as u64);

    let mut buf = vec![0u8; read_size];
    let mut batch_bufs = vec![vec![0u8; read_size]; batch_requests];
    let mut offsets = vec![0u64; batch_requests];
    let mut stream_buf = Vec::with_capacity(stream_size);

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(42 + id as u64);

    if let Some(range) = prefill {
        let chunk = (file.block_size() * file.options().batch_size) as u64;
        let mut offset = range.start;
        while offset < range.end {
            let len = chunk.min(range.end - offset) as usize;
            if let Err(e) = file.prefetch(len, offset, opt) {
                warn!(worker = id, offset, error = %e, "prefill failed");
            }
            offset += len as u64;
        }
    }
    shared.mark_prefill_complete();

    loop {
        let phase = shared.phase();
        match phase {
            Phase::Prefill => {
                std::hint::spin_loop();
                continue;
            }
            Phase::Stop => break,
            Phase::Warmup | Phase::Running => {}
        }

        let roll: u8 = rng.random_range(0..100);
        let recording = phase == Phase::Running;

        if roll < read_threshold {
            let offset = rng.random_range(0..=max_offset);
            let start = Instant::now();
            let result = file.read(&mut buf, offset, opt);
            let elapsed_ns = start.elapsed().as_nanos() as u64;

            if recording {
                metrics::READ_COUNT.increment();
                record(result.map(|n| n as u64).ok(), elapsed_ns);
                let _ = metrics::READ_LATENCY.increment(elapsed_ns);
            }
        } else if roll < batch_threshold {
            for offset in offsets.iter_mut() {
                *offset = rng.random_range(0..=max_offset);
            }
            offsets.sort_unstable();

            let start = Instant::now();
            let mut requests: Vec<ReadRequest<'_>> = offsets
                .iter()
                .zip(batch_bufs.iter_mut())
                .map(|(offset, buf)| ReadRequest::new(*offset, buf))
                .collect();
            let results = file.batch_read_ordered(&mut requests, opt);
            let elapsed_ns = start.elapsed().as_nanos() as u64;

            if recording {
                metrics::BATCH_COUNT.increment();
                let bytes: Option<u64> = results
                    .iter()
                    .map(|r| r.as_ref().ok().map(|n| *n as u64))
                    .sum();
                record(bytes, elapsed_ns);
                let _ = metrics::BATCH_LATENCY.increment(elapsed_ns);
            }
        } else {
            let len = (stream_size as u64).min(file.len());
            let offset = rng.random_range(0..=file.len() - len);

            let start = Instant::now();
            let result = stream(file, opt, offset, len, &mut stream_buf);
            let elapsed_ns = start.elapsed().as_nanos() as u64;

            if recording {
                metrics::STREAM_COUNT.increment();
                record(result, elapsed_ns);
                let _ = metrics::STREAM_LATENCY.increment(elapsed_ns);
            }
        }
    }
}

/// Read `[offset, offset + len)` through a slice list reader.
fn stream(
    file: &Arc<FileAccessor>,
    opt: &ReadOption,
    offset: u64,
    len: u64,
    out: &mut Vec<u8>,
) -> Option<u64> {
    let retriever = RawRetriever::new(file.clone(), opt.clone());
    let list = ByteSliceList::new(retriever, offset, len).ok()?;
    out.clear();
    ByteSliceReader::new(list)
        .read_to_end(out)
        .ok()
        .map(|n| n as u64)
}

fn record(bytes: Option<u64>, elapsed_ns: u64) {
    metrics::COMPLETED_COUNT.increment();
    match bytes {
        Some(bytes) => {
            metrics::BYTES_READ.add(bytes);
        }
        None => {
            metrics::OP_ERRORS.increment();
        }
    }
    let _ = metrics::RESPONSE_LATENCY.increment(elapsed_ns);
}
