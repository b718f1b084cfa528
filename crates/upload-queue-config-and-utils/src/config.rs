//! Configuration management for the daemon.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default period between scheduled flushes.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 10_000;

/// Main daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Period between scheduled flushes, in milliseconds.
    pub flush_interval_ms: u64,
    /// Database file; `None` uses the file under the base directory.
    pub database_file: Option<PathBuf>,
    /// HTTP delivery settings shared by every queue.
    pub sender: SenderSettings,
    /// Queues flushed by the scheduler.
    pub queues: Vec<QueueConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            database_file: None,
            sender: SenderSettings::default(),
            queues: Vec::new(),
        }
    }
}

/// HTTP delivery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderSettings {
    pub timeout_secs: u64,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub max_retries: u32,
    pub auth_token: Option<String>,
}

impl Default for SenderSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            initial_retry_delay_ms: 1000,
            max_retry_delay_ms: 60000,
            max_retries: 3,
            auth_token: None,
        }
    }
}

/// One configured queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Registry id.
    pub id: String,
    /// Storage location (table) of the queue's records.
    pub storage_location: String,
    /// Maximum records per batch; unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Upload endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_url: Option<String>,
}

impl QueueConfig {
    /// The static URL, parsed.
    pub fn static_url(&self) -> CoreResult<Option<Url>> {
        self.static_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(CoreError::from)
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the base directory, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the base directory.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_env(|name| std::env::var(name).ok());
    }

    /// Apply `UPLOAD_QUEUE_*` overrides read through `lookup`.
    ///
    /// Values that do not parse are ignored.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(log_level) = lookup("UPLOAD_QUEUE_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(interval) = lookup("UPLOAD_QUEUE_FLUSH_INTERVAL_MS")
            .and_then(|raw| raw.trim().parse().ok())
        {
            self.flush_interval_ms = interval;
        }
        if let Some(token) = lookup("UPLOAD_QUEUE_AUTH_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.sender.auth_token = Some(token);
        }
    }

    /// Period between scheduled flushes.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Database file to open.
    pub fn database_path(&self, paths: &Paths) -> PathBuf {
        self.database_file
            .clone()
            .unwrap_or_else(|| paths.database_file())
    }

    /// Look up a queue by id.
    pub fn queue(&self, id: &str) -> Option<&QueueConfig> {
        self.queues.iter().find(|q| q.id == id)
    }

    /// Reject configurations the daemon cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.flush_interval_ms == 0 {
            return Err(CoreError::Config(
                "flush_interval_ms must be greater than zero".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for queue in &self.queues {
            if queue.id.trim().is_empty() {
                return Err(CoreError::Config("queue id must not be empty".to_string()));
            }
            if !ids.insert(queue.id.as_str()) {
                return Err(CoreError::Config(format!("duplicate queue id '{}'", queue.id)));
            }
            if queue.storage_location.trim().is_empty() {
                return Err(CoreError::Config(format!(
                    "queue '{}' has an empty storage_location",
                    queue.id
                )));
            }
            if queue.max_length == Some(0) {
                return Err(CoreError::Config(format!(
                    "queue '{}' has max_length 0",
                    queue.id
                )));
            }
            queue.static_url()?;
        }
        Ok(())
    }
}
