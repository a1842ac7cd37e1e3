//! Configuration loading and tracing setup.
//!
//! Configuration comes from a YAML file (path in `STREAMSTORE_CONFIG`,
//! default `streamstore.yaml`) with environment variable overrides on top.
//! Every field has a default, so an absent file is not an error.
//!
//! ```yaml
//! storage:
//!   path: ./data/streamstore.db
//!   reader_threads: 4
//! notifier:
//!   interval_ms: 1000
//!   batch_size: 50
//!   channel_capacity: 1024
//! ```

use std::path::Path;
use std::thread::available_parallelism;
use std::time::Duration;

use serde::Deserialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::{Error, Result};

/// Minimum number of reader threads.
const MIN_READ_THREADS: usize = 1;

/// Maximum number of reader threads.
const MAX_READ_THREADS: usize = 16;

/// Shortest poll interval the notifier accepts.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite backend configuration.
    pub storage: StorageConfig,
    /// Polling notifier configuration.
    pub notifier: NotifierConfig,
}

/// SQLite backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    pub path: String,
    /// Size of the reader pool. Defaults to the CPU count, clamped to 1..=16.
    pub reader_threads: Option<usize>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "./data/streamstore.db".to_string(),
            reader_threads: None,
        }
    }
}

impl StorageConfig {
    /// A configuration for the database at `path` with the default pool size.
    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_string_lossy().into_owned(),
            ..Self::default()
        }
    }

    /// Resolved number of reader threads.
    pub fn reader_count(&self) -> usize {
        self.reader_threads
            .unwrap_or_else(|| {
                available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(MIN_READ_THREADS)
            })
            .clamp(MIN_READ_THREADS, MAX_READ_THREADS)
    }
}

/// Polling notifier configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Sleep between polls that found nothing new, in milliseconds.
    pub interval_ms: u64,
    /// Messages fetched per poll.
    pub batch_size: usize,
    /// Notifications buffered per subscriber before it lags.
    pub channel_capacity: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            batch_size: 50,
            channel_capacity: 1024,
        }
    }
}

impl NotifierConfig {
    /// The poll interval as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Sets the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = interval.as_millis() as u64;
        self
    }

    /// Sets the poll batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Rejects intervals below 10ms and zero-sized batches or channels.
    pub fn validate(&self) -> Result<()> {
        if self.interval() < MIN_POLL_INTERVAL {
            return Err(Error::InvalidArgument(format!(
                "poll interval must be at least {}ms, got {}ms",
                MIN_POLL_INTERVAL.as_millis(),
                self.interval_ms
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidArgument(
                "poll batch size must be at least 1".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(Error::InvalidArgument(
                "notification channel capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("STREAMSTORE_CONFIG").unwrap_or_else(|_| "streamstore.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.notifier.validate()?;

        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))
    }

    /// Applies overrides looked up by variable name. Unparseable numbers are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("STREAMSTORE_PATH") {
            self.storage.path = path;
        }

        if let Some(threads) = lookup("STREAMSTORE_READER_THREADS").and_then(|v| v.parse().ok()) {
            self.storage.reader_threads = Some(threads);
        }

        if let Some(interval) = lookup("STREAMSTORE_POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.notifier.interval_ms = interval;
        }

        if let Some(batch) = lookup("STREAMSTORE_POLL_BATCH_SIZE").and_then(|v| v.parse().ok()) {
            self.notifier.batch_size = batch;
        }
    }
}

/// Installs a `tracing` subscriber filtered by `STREAMSTORE_LOG` (default `info`).
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("STREAMSTORE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
