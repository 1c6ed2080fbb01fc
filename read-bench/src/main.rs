//! Read path benchmark: worker threads issuing random reads, ordered batch
//! reads and slice list scans against one cached file.

mod config;
mod logging;
mod metrics;
mod worker;

use crate::config::{BackendKind, Config, ConfigError};
use crate::worker::{Phase, SharedState};

use block_cache::{BlockCache, CacheError};
use clap::Parser;
use io_continuation::{Executor, Inline, ThreadPool};
use metriken::{AtomicHistogram, histogram::Histogram};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use segment_reader::{
    FileAccessor, LocalFsBackend, MemoryBackend, ReadError, ReadOption, StorageBackend,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "read-bench")]
#[command(about = "Block-cached segment read benchmark")]
struct Args {
    /// Path to configuration file
    config: PathBuf,

    /// Override the number of worker threads
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
enum BenchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cache: {0}")]
    Cache(#[from] CacheError),
    #[error("open: {0}")]
    Open(#[from] ReadError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("{0}")]
    Invalid(String),
}

fn main() {
    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };
    if let Some(threads) = args.threads {
        config.general.threads = threads.max(1);
    }

    logging::init(&config.logging);

    if let Err(e) = run(config) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(config: Config) -> Result<(), BenchError> {
    print_config(&config);

    let backend = build_backend(&config)?;
    let cache = BlockCache::new(&config.cache)?;
    let file = Arc::new(FileAccessor::open(
        &config.file.path,
        &*backend,
        cache.clone(),
        config.file.options.clone(),
    )?);
    if file.len() < config.workload.read_size as u64 {
        return Err(BenchError::Invalid(format!(
            "{} is smaller than read_size",
            config.file.path.display()
        )));
    }

    let executor: Arc<dyn Executor> = if config.general.io_threads > 0 {
        Arc::new(ThreadPool::new("io", config.general.io_threads)?)
    } else {
        Arc::new(Inline)
    };
    let mut opt = ReadOption::new(executor);
    if let Some(timeout) = config.workload.timeout {
        opt = opt.with_timeout(timeout);
    }

    let num_threads = config.general.threads;
    let warmup = config.general.warmup;
    let duration = config.general.duration;

    let cpu_ids = match config.general.cpu_list {
        Some(ref cpu_list) => Some(
            config::parse_cpu_list(cpu_list)
                .map_err(|e| BenchError::Invalid(format!("invalid cpu_list: {e}")))?,
        ),
        None => None,
    };

    let shared = Arc::new(SharedState::new());

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let prefill = config.workload.prefill;
    if prefill {
        eprintln!(
            "prefilling {} bytes across {} threads...",
            file.len(),
            num_threads
        );
        shared.set_phase(Phase::Prefill);
    } else {
        shared.set_phase(Phase::Warmup);
    }

    let config = Arc::new(config);
    let mut handles = Vec::with_capacity(num_threads);

    for id in 0..num_threads {
        let file = Arc::clone(&file);
        let shared = Arc::clone(&shared);
        let opt = opt.clone();
        let cpu_ids = cpu_ids.clone();
        let config = Arc::clone(&config);
        let prefill_range = prefill
            .then(|| worker::prefill_range(file.len(), file.block_size(), id, num_threads));

        let handle = thread::Builder::new()
            .name(format!("worker-{id}"))
            .spawn(move || {
                if let Some(ref ids) = cpu_ids
                    && !ids.is_empty()
                {
                    let cpu_id = ids[id % ids.len()];
                    if let Err(e) = pin_to_cpu(cpu_id) {
                        debug!(worker = id, cpu_id, error = %e, "failed to pin worker");
                    }
                }
                worker::run_worker(id, &config, &file, &opt, &shared, prefill_range);
            })?;

        handles.push(handle);
    }

    // Main thread: reporting loop
    let start = Instant::now();
    let report_interval = Duration::from_secs(1);
    let mut last_report = Instant::now();
    let mut last_completed = 0u64;
    let mut last_bytes = 0u64;
    let mut last_hits = 0u64;
    let mut last_misses = 0u64;
    let mut last_histogram: Option<Histogram> = None;
    let mut current_phase = if prefill { Phase::Prefill } else { Phase::Warmup };
    let mut warmup_start: Option<Instant> = if prefill { None } else { Some(start) };

    loop {
        thread::sleep(Duration::from_millis(100));

        if !running.load(Ordering::SeqCst) {
            shared.set_phase(Phase::Stop);
            break;
        }

        if current_phase == Phase::Prefill {
            if shared.prefill_complete_count() >= num_threads {
                shared.set_phase(Phase::Warmup);
                current_phase = Phase::Warmup;
                warmup_start = Some(Instant::now());
                info!(
                    resident_blocks = cache.resident_blocks(),
                    "prefill complete, warming up for {warmup:?}"
                );
            }
            continue;
        }

        let elapsed = warmup_start.unwrap_or(start).elapsed();
        if elapsed >= warmup + duration {
            shared.set_phase(Phase::Stop);
            break;
        }

        if current_phase == Phase::Warmup && elapsed >= warmup {
            shared.set_phase(Phase::Running);
            current_phase = Phase::Running;
            eprintln!("running for {duration:?}...");
            print_header();
            last_report = Instant::now();
            last_completed = metrics::COMPLETED_COUNT.value();
            last_bytes = metrics::BYTES_READ.value();
            last_hits = metrics::BLOCK_HITS.value();
            last_misses = metrics::BLOCK_MISSES.value();
            last_histogram = metrics::RESPONSE_LATENCY.load();
        }

        if current_phase != Phase::Running {
            continue;
        }

        if last_report.elapsed() >= report_interval {
            let completed = metrics::COMPLETED_COUNT.value();
            let bytes = metrics::BYTES_READ.value();
            let hits = metrics::BLOCK_HITS.value();
            let misses = metrics::BLOCK_MISSES.value();
            let elapsed_secs = last_report.elapsed().as_secs_f64();

            let rate = (completed - last_completed) as f64 / elapsed_secs;
            let mbps = (bytes - last_bytes) as f64 / elapsed_secs / (1024.0 * 1024.0);
            let hit_pct = hit_percent(hits - last_hits, misses - last_misses);
            last_completed = completed;
            last_bytes = bytes;
            last_hits = hits;
            last_misses = misses;

            // Interval percentiles via wrapping_sub
            let current_histogram = metrics::RESPONSE_LATENCY.load();
            let delta = match (&current_histogram, &last_histogram) {
                (Some(current), Some(previous)) => current.wrapping_sub(previous).ok(),
                (Some(current), None) => Some(current.clone()),
                _ => None,
            };
            let (p50, p99, p999, max) = match &delta {
                Some(hist) => (
                    percentile_from_histogram(hist, 50.0) / 1000.0,
                    percentile_from_histogram(hist, 99.0) / 1000.0,
                    percentile_from_histogram(hist, 99.9) / 1000.0,
                    percentile_from_histogram(hist, 100.0) / 1000.0,
                ),
                None => (0.0, 0.0, 0.0, 0.0),
            };
            last_histogram = current_histogram;

            println!(
                "{:>12.0} {:>10.1} {:>7.1}% {:>10.1} {:>10.1} {:>10.1} {:>10.1}",
                rate, mbps, hit_pct, p50, p99, p999, max,
            );

            last_report = Instant::now();
        }
    }

    for handle in handles {
        let _ = handle.join();
    }

    print_summary(&config, &cache);

    Ok(())
}

fn build_backend(config: &Config) -> Result<Box<dyn StorageBackend>, BenchError> {
    match config.file.backend {
        BackendKind::Local => Ok(Box::new(LocalFsBackend::new())),
        BackendKind::Memory => {
            let mut data = vec![0u8; config.file.size];
            Xoshiro256PlusPlus::seed_from_u64(7).fill_bytes(&mut data);
            let backend = MemoryBackend::new();
            backend.insert(config.file.path.clone(), data);
            if let Some(latency) = config.file.latency {
                backend.delay_reads(config.file.path.clone(), latency);
            }
            Ok(Box::new(backend))
        }
    }
}

fn hit_percent(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total > 0 {
        (hits as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

fn print_config(config: &Config) {
    eprintln!("read-bench configuration:");
    eprintln!("  backend:    {}", config.file.backend);
    eprintln!("  path:       {}", config.file.path.display());
    eprintln!("  block_size: {} bytes", config.cache.block_size);
    eprintln!("  budget:     {} bytes", config.cache.memory_budget);
    eprintln!("  shards:     {}", config.cache.shards());
    eprintln!("  batch_size: {} blocks", config.file.options.batch_size);
    eprintln!("  priority:   {}", config.file.options.priority);
    eprintln!("  threads:    {} (io: {})", config.general.threads, config.general.io_threads);
    eprintln!("  duration:   {:?}", config.general.duration);
    eprintln!("  warmup:     {:?}", config.general.warmup);
    eprintln!(
        "  mix:        read={} batch={} stream={}",
        config.workload.mix.read, config.workload.mix.batch, config.workload.mix.stream,
    );
    eprintln!("  read_size:  {} bytes", config.workload.read_size);
    eprintln!();
}

fn print_header() {
    println!(
        "{:>12} {:>10} {:>8} {:>10} {:>10} {:>10} {:>10}",
        "ops/sec", "MB/s", "hit%", "p50(us)", "p99(us)", "p999(us)", "max(us)",
    );
    println!("{}", "-".repeat(78));
}

fn print_summary(config: &Config, cache: &BlockCache) {
    let reads = metrics::READ_COUNT.value();
    let batches = metrics::BATCH_COUNT.value();
    let streams = metrics::STREAM_COUNT.value();
    let completed = metrics::COMPLETED_COUNT.value();
    let errors = metrics::OP_ERRORS.value();
    let bytes = metrics::BYTES_READ.value();
    let backend_reads = metrics::BACKEND_READS.value();
    let stats = cache.stats();

    let elapsed = config.general.duration.as_secs_f64();
    let avg_rate = if elapsed > 0.0 {
        completed as f64 / elapsed
    } else {
        0.0
    };

    eprintln!();
    eprintln!("=== Final Summary ===");
    eprintln!("  total ops:      {completed} (errors: {errors})");
    eprintln!("  avg ops/sec:    {avg_rate:.0}");
    eprintln!("  reads:          {reads}");
    eprintln!("  batches:        {batches}");
    eprintln!("  streams:        {streams}");
    eprintln!("  bytes read:     {bytes}");
    eprintln!("  backend calls:  {backend_reads}");
    eprintln!("  hit rate:       {:.1}%", stats.hit_rate() * 100.0);
    eprintln!(
        "  cache:          {} / {} blocks, {} evictions, {} joined fetches",
        stats.resident_blocks, stats.capacity, stats.evictions, stats.joined,
    );
    eprintln!();

    print_latency_summary("READ", &metrics::READ_LATENCY);
    print_latency_summary("BATCH", &metrics::BATCH_LATENCY);
    if streams > 0 {
        print_latency_summary("STREAM", &metrics::STREAM_LATENCY);
    }
    print_latency_summary("ALL", &metrics::RESPONSE_LATENCY);
}

fn print_latency_summary(label: &str, hist: &AtomicHistogram) {
    let p50 = percentile(hist, 50.0) / 1000.0;
    let p90 = percentile(hist, 90.0) / 1000.0;
    let p99 = percentile(hist, 99.0) / 1000.0;
    let p999 = percentile(hist, 99.9) / 1000.0;
    let max = percentile(hist, 100.0) / 1000.0;

    eprintln!(
        "  {label:<6} latency (us): p50={p50:.1}  p90={p90:.1}  p99={p99:.1}  p999={p999:.1}  max={max:.1}",
    );
}

// --- Histogram helpers ---

fn percentile(hist: &AtomicHistogram, p: f64) -> f64 {
    match hist.load() {
        Some(snapshot) => percentile_from_histogram(&snapshot, p),
        None => 0.0,
    }
}

fn percentile_from_histogram(hist: &Histogram, p: f64) -> f64 {
    if let Ok(Some(results)) = hist.percentiles(&[p])
        && let Some((_pct, bucket)) = results.first()
    {
        return bucket.end() as f64;
    }
    0.0
}

// --- CPU pinning ---

#[cfg(target_os = "linux")]
fn pin_to_cpu(cpu_id: usize) -> std::io::Result<()> {
    use std::mem;

    unsafe {
        let mut cpuset: libc::cpu_set_t = mem::zeroed();
        libc::CPU_ZERO(&mut cpuset);
        libc::CPU_SET(cpu_id, &mut cpuset);

        let result = libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &cpuset);

        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_cpu(_cpu_id: usize) -> std::io::Result<()> {
    Ok(())
}
