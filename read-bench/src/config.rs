//! Configuration for the read path benchmark.

use block_cache::BlockCacheConfig;
use block_cache::config::deserialize_size;
use segment_reader::FileOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub general: GeneralConfig,
    #[serde(default)]
    pub cache: BlockCacheConfig,
    pub file: FileConfig,
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// General benchmark settings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    /// How long to run the measurement phase.
    #[serde(deserialize_with = "deserialize_duration")]
    pub duration: Duration,
    /// How long to warm up before recording metrics.
    #[serde(deserialize_with = "deserialize_duration")]
    pub warmup: Duration,
    /// Number of worker threads.
    pub threads: usize,
    /// Threads completing backend reads. 0 completes them inline on the
    /// worker.
    #[serde(default)]
    pub io_threads: usize,
    /// Optional list of CPU cores to pin workers to (e.g., "0-3,6-8").
    pub cpu_list: Option<String>,
}

/// Where the benchmarked file lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Synthetic file held in memory.
    Memory,
    /// Existing file on the local filesystem.
    Local,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::Local => write!(f, "local"),
        }
    }
}

/// File under test.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub backend: BackendKind,
    /// Required for the local backend; a label for the memory backend.
    #[serde(default = "default_path")]
    pub path: PathBuf,
    /// Size of the synthetic file (memory backend only).
    #[serde(default = "default_file_size", deserialize_with = "deserialize_size")]
    pub size: usize,
    /// Simulated backend latency per call (memory backend only).
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub latency: Option<Duration>,
    #[serde(default)]
    pub options: FileOptions,
}

fn default_path() -> PathBuf {
    PathBuf::from("/bench/segment")
}

fn default_file_size() -> usize {
    64 * 1024 * 1024
}

/// Workload configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadConfig {
    /// Warm the cache with the whole file before measurement.
    #[serde(default)]
    pub prefill: bool,
    /// Bytes per read request.
    #[serde(deserialize_with = "deserialize_size")]
    pub read_size: usize,
    /// Requests per ordered batch read.
    #[serde(default = "default_batch_requests")]
    pub batch_requests: usize,
    /// Per-call time budget.
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub timeout: Option<Duration>,
    /// Operation mix (must sum to 100).
    pub mix: MixConfig,
}

fn default_batch_requests() -> usize {
    8
}

/// Operation mix (percentages, must sum to 100).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MixConfig {
    /// Single random `read` calls.
    pub read: u8,
    /// `batch_read_ordered` over random sorted offsets.
    pub batch: u8,
    /// Sequential scans through a slice list reader.
    pub stream: u8,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mix = &self.workload.mix;
        let total = mix.read as u16 + mix.batch as u16 + mix.stream as u16;
        if total != 100 {
            return Err(ConfigError::Invalid(format!(
                "operation mix must sum to 100 (got {total}): read={} batch={} stream={}",
                mix.read, mix.batch, mix.stream,
            )));
        }
        if self.general.threads == 0 {
            return Err(ConfigError::Invalid("threads must be at least 1".into()));
        }
        if self.workload.read_size == 0 || self.workload.batch_requests == 0 {
            return Err(ConfigError::Invalid(
                "read_size and batch_requests must be non-zero".into(),
            ));
        }
        if self.file.backend == BackendKind::Memory && self.file.size < self.workload.read_size {
            return Err(ConfigError::Invalid(format!(
                "file size {} is smaller than read_size {}",
                self.file.size, self.workload.read_size
            )));
        }
        self.cache
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.file
            .options
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}

/// Deserialize a duration from a human-readable string (e.g., "60s", "5m").
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialize_duration(deserializer).map(Some)
}

/// Parse a CPU list string like "0-3,6-8" into a Vec of CPU IDs.
pub fn parse_cpu_list(s: &str) -> Result<Vec<usize>, String> {
    let mut cpus = Vec::new();
    for part in s.split(',') {
        let part = part.trim();
        if let Some((start, end)) = part.split_once('-') {
            let start: usize = start
                .trim()
                .parse()
                .map_err(|e| format!("invalid CPU id '{start}': {e}"))?;
            let end: usize = end
                .trim()
                .parse()
                .map_err(|e| format!("invalid CPU id '{end}': {e}"))?;
            if start > end {
                return Err(format!("invalid range {start}-{end}"));
            }
            cpus.extend(start..=end);
        } else {
            let cpu: usize = part
                .parse()
                .map_err(|e| format!("invalid CPU id '{part}': {e}"))?;
            cpus.push(cpu);
        }
    }
    Ok(cpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
        [general]
        duration = "10s"
        warmup = "1s"
        threads = 4
        io_threads = 2

        [cache]
        block_size = "16KB"
        memory_budget = "8MB"

        [file]
        backend = "memory"
        size = "32MB"
        latency = "100us"

        [file.options]
        batch_size = 8

        [workload]
        read_size = "4KB"
        timeout = "50ms"

        [workload.mix]
        read = 70
        batch = 20
        stream = 10
    "#;

    #[test]
    fn test_parse_example() {
        let config: Config = toml::from_str(EXAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.general.duration, Duration::from_secs(10));
        assert_eq!(config.cache.block_size, 16 * 1024);
        assert_eq!(config.file.size, 32 * 1024 * 1024);
        assert_eq!(config.file.latency, Some(Duration::from_micros(100)));
        assert_eq!(config.file.options.batch_size, 8);
        assert_eq!(config.workload.batch_requests, 8);
        assert_eq!(config.workload.timeout, Some(Duration::from_millis(50)));
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_mix_must_sum_to_100() {
        let config: Config = toml::from_str(&EXAMPLE.replace("stream = 10", "stream = 5")).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let input = EXAMPLE.replace("io_threads = 2", "io_threads = 2\nbogus = 1");
        assert!(toml::from_str::<Config>(&input).is_err());
    }

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0-3,6").unwrap(), vec![0, 1, 2, 3, 6]);
        assert!(parse_cpu_list("3-1").is_err());
        assert!(parse_cpu_list("x").is_err());
    }
}
