//! Per-call read options.

use io_continuation::{Executor, Inline};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Access pattern hint passed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoAdvice {
    #[default]
    Normal,
    Sequential,
    Random,
    WillNeed,
    DontNeed,
}

/// Counters a caller can attach to a [`ReadOption`] to see what its reads
/// cost. Shared between every call that uses the option.
#[derive(Debug, Default)]
pub struct ReadStats {
    hits: AtomicU64,
    misses: AtomicU64,
    io_calls: AtomicU64,
    bytes_fetched: AtomicU64,
}

impl ReadStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block lookups served from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Block lookups that had to fetch or wait for a fetch.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Backend calls issued.
    pub fn io_calls(&self) -> u64 {
        self.io_calls.load(Ordering::Relaxed)
    }

    /// Bytes filled into the cache by this caller's backend calls.
    pub fn bytes_fetched(&self) -> u64 {
        self.bytes_fetched.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.io_calls.store(0, Ordering::Relaxed);
        self.bytes_fetched.store(0, Ordering::Relaxed);
    }
}

/// Configuration for one read call.
#[derive(Clone)]
pub struct ReadOption {
    pub advice: IoAdvice,
    pub stats: Option<Arc<ReadStats>>,
    /// Budget for the whole call. Checked before each backend call is
    /// issued; I/O already in flight is never cut short.
    pub timeout: Option<Duration>,
    /// Where backend completions run.
    pub executor: Arc<dyn Executor>,
}

impl Default for ReadOption {
    fn default() -> Self {
        Self {
            advice: IoAdvice::default(),
            stats: None,
            timeout: None,
            executor: Arc::new(Inline),
        }
    }
}

impl ReadOption {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            ..Default::default()
        }
    }

    pub fn with_advice(mut self, advice: IoAdvice) -> Self {
        self.advice = advice;
        self
    }

    pub fn with_stats(mut self, stats: Arc<ReadStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|timeout| Instant::now() + timeout)
    }

    pub(crate) fn record_lookup(&self, hits: u64, misses: u64) {
        if let Some(stats) = &self.stats {
            stats.hits.fetch_add(hits, Ordering::Relaxed);
            stats.misses.fetch_add(misses, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_io_call(&self) {
        if let Some(stats) = &self.stats {
            stats.io_calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_fetched(&self, bytes: u64) {
        if let Some(stats) = &self.stats {
            stats.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for ReadOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOption")
            .field("advice", &self.advice)
            .field("stats", &self.stats)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_recording() {
        let stats = Arc::new(ReadStats::new());
        let option = ReadOption::default().with_stats(stats.clone());
        option.record_lookup(2, 3);
        option.record_io_call();
        option.record_fetched(4096);
        assert_eq!((stats.hits(), stats.misses()), (2, 3));
        assert_eq!(stats.io_calls(), 1);
        assert_eq!(stats.bytes_fetched(), 4096);

        stats.reset();
        assert_eq!(stats.misses(), 0);
    }

    #[test]
    fn test_deadline() {
        let option = ReadOption::default();
        assert!(option.deadline().is_none());
        let option = option.with_timeout(Duration::ZERO);
        assert!(option.deadline().is_some_and(|d| d <= Instant::now()));
    }
}
