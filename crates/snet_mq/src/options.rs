//! Host options

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings of a [`crate::PluginHost`]; the `[host]` config section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostOptions {
    /// Directory watched for backend modules
    pub library_dir: PathBuf,
    /// Glob applied to module file names
    pub library_pattern: String,
    /// Directory watched for instance configs
    pub config_dir: PathBuf,
    /// Config file-name suffix, without leading dot
    pub config_suffix: String,
    /// Config field holding the instance serial
    pub sn_key: String,
    /// Open instances right after construction
    pub auto_open: bool,
    /// Failed-open retry period
    pub retry_interval_ms: u64,
    /// Produce worker count
    pub workers: usize,
    /// Produce queue capacity
    pub queue_capacity: usize,
    /// Delay before each watcher event is handled
    pub debounce_ms: u64,
    /// Attempts to read a config file
    pub config_retries: u32,
    /// Delay between config read attempts
    pub config_retry_backoff_ms: u64,
    /// How long shutdown waits for queued produces
    pub drain_timeout_ms: u64,
    /// Start the file-system watchers
    pub watch: bool,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            library_dir: PathBuf::from("./plugins"),
            library_pattern: "Snet.*".to_string(),
            config_dir: PathBuf::from("./plugins/config"),
            config_suffix: "config.json".to_string(),
            sn_key: "SN".to_string(),
            auto_open: true,
            retry_interval_ms: 1000,
            workers: 5,
            queue_capacity: 100_000,
            debounce_ms: 200,
            config_retries: 5,
            config_retry_backoff_ms: 1000,
            drain_timeout_ms: 5000,
            watch: true,
        }
    }
}

impl HostOptions {
    pub fn new(library_dir: impl Into<PathBuf>, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            library_dir: library_dir.into(),
            config_dir: config_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_library_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.library_pattern = pattern.into();
        self
    }

    pub fn with_config_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config_suffix = suffix.into().trim_start_matches('.').to_string();
        self
    }

    pub fn with_sn_key(mut self, key: impl Into<String>) -> Self {
        self.sn_key = key.into();
        self
    }

    pub fn with_auto_open(mut self, auto_open: bool) -> Self {
        self.auto_open = auto_open;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = debounce.as_millis() as u64;
        self
    }

    pub fn with_config_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.config_retries = retries;
        self.config_retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn config_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.config_retry_backoff_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Worker count, at least one
    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }

    /// Queue capacity, at least one
    pub fn capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }
}
