//! Configuration types for the queue, the workers, and logging.
//!
//! Everything here is plain serde data with builder-style setters, so a
//! deployment can load it from a file or environment and hand it to
//! [`crate::service::QueueService`] and [`crate::worker::WorkerPool`].

use crate::index::PriorityIndex;
use crate::task::TaskKind;
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Retry backoff policy: `base * 2^attempts`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay in seconds for the exponential backoff.
    pub base_delay_secs: u64,
    /// Upper bound on the computed delay, in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: 1,
            max_delay_secs: 300,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given the attempts consumed so far.
    pub fn delay(&self, attempts: u32) -> ChronoDuration {
        let exp = self
            .base_delay_secs
            .saturating_mul(2u64.saturating_pow(attempts));
        ChronoDuration::seconds(exp.min(self.max_delay_secs) as i64)
    }

    /// Policy with no delay, useful in tests.
    pub fn immediate() -> Self {
        Self {
            base_delay_secs: 0,
            max_delay_secs: 0,
        }
    }
}

/// Which priority-index backend to use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum IndexConfig {
    /// Per-process in-memory lanes.
    Memory,
    /// Redis sorted-set lanes, shared across worker processes.
    #[cfg(feature = "redis-index")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-index")))]
    Redis {
        /// Connection URL, e.g. `redis://localhost:6379/0`.
        url: String,
        /// Prefix for lane keys.
        key_prefix: String,
    },
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig::Memory
    }
}

impl IndexConfig {
    /// Construct the configured index backend.
    pub async fn build(&self) -> crate::error::QueueResult<Arc<dyn PriorityIndex>> {
        match self {
            IndexConfig::Memory => Ok(Arc::new(crate::index::InMemoryIndex::new())),
            #[cfg(feature = "redis-index")]
            IndexConfig::Redis { url, key_prefix } => Ok(Arc::new(
                crate::index::RedisIndex::connect(url, key_prefix.clone()).await?,
            )),
        }
    }
}

/// Queue-service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Retry backoff policy for failed tasks.
    pub retry: RetryPolicy,
    /// Priority-index backend.
    pub index: IndexConfig,
    /// Default retention window for the cleanup sweep, in days.
    pub retention_days: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            index: IndexConfig::default(),
            retention_days: 7,
        }
    }
}

impl QueueConfig {
    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the retention window.
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }
}

/// Worker configuration.
///
/// A worker processes one task at a time; concurrency comes from running more
/// workers, each with its own identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Prefix for generated worker ids.
    pub id_prefix: String,
    /// Sleep between polls when idle, in milliseconds.
    pub poll_interval_ms: u64,
    /// Task kinds this worker serves. `None` means all known kinds.
    pub kinds: Option<Vec<TaskKind>>,
    /// Number of workers a pool spawns.
    pub num_workers: usize,
    /// Time to wait for workers to drain on shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id_prefix: "worker".to_string(),
            poll_interval_ms: 5000,
            kinds: None,
            num_workers: num_cpus::get().max(1),
            shutdown_timeout_secs: 30,
        }
    }
}

impl WorkerConfig {
    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Kinds this worker serves, defaulting to all known kinds.
    pub fn supported_kinds(&self) -> Vec<TaskKind> {
        self.kinds
            .clone()
            .unwrap_or_else(|| TaskKind::ALL.to_vec())
    }

    /// Set the poll interval in milliseconds.
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Restrict the worker to specific kinds.
    pub fn with_kinds(mut self, kinds: Vec<TaskKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    /// Set the pool size.
    pub fn with_num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    /// Read overrides from `WORKER_POLL_INTERVAL` (ms) and
    /// `WORKER_TASK_TYPES` (comma-separated kind names). Unknown kind names
    /// are ignored; if none of the listed names parse, the filter is dropped
    /// and the worker serves all kinds.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("WORKER_POLL_INTERVAL")
            && let Ok(ms) = raw.trim().parse::<u64>()
        {
            config.poll_interval_ms = ms;
        }

        if let Ok(raw) = std::env::var("WORKER_TASK_TYPES") {
            let kinds: Vec<TaskKind> = raw
                .split(',')
                .filter_map(|name| name.trim().parse().ok())
                .collect();
            if !kinds.is_empty() {
                config.kinds = Some(kinds);
            }
        }

        config
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter, e.g. `info` or `laneq=debug`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Install a global `tracing` subscriber for this configuration.
    ///
    /// Returns an error if a subscriber is already installed.
    pub fn init(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_new(&self.level)?;
        if self.json {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .try_init()?;
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .try_init()?;
        }
        Ok(())
    }
}
