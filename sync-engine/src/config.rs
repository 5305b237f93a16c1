//! Configuration loading for sync-engine.
//!
//! Configuration is loaded from a TOML file (default: `tablesync.toml`).
//! Every section and field is optional; missing values use the defaults below.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use sync_core::{RetryPolicy, DEFAULT_LOG_CAPACITY};

use crate::engine::EngineConfig;
use crate::scheduler::SchedulerConfig;

/// Sequential adapter calls a run can make, each bounded by the operation timeout.
const ADAPTER_CALLS_PER_RUN: u64 = 3;

/// Root configuration for tablesync.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Reconciliation engine configuration.
    #[serde(default)]
    pub engine: EngineSection,
    /// Run scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerSection,
    /// Row store locations.
    #[serde(default)]
    pub stores: StoresSection,
}

/// `[engine]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// Minimum seconds between two `no-op` log entries (default: 30).
    #[serde(default = "default_quiet_interval")]
    pub quiet_interval_secs: u64,
    /// Number of run log entries retained (default: 100).
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Timeout in seconds for each adapter call (default: 30).
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// Seconds between timer-triggered runs; 0 disables polling (default: 30).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Executions per run before it is marked failed (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds, doubled per retry (default: 2000).
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    /// Time budget in seconds for a single attempt (default: 120). Must exceed
    /// three times `engine.operation_timeout_secs`.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
    /// Seconds `shutdown()` waits for the in-flight run (default: 10).
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    /// Maximum number of queued runs (default: 64).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// `[stores]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StoresSection {
    /// JSON file holding side A (default: `side_a.json`).
    #[serde(default = "default_side_a")]
    pub side_a: PathBuf,
    /// JSON file holding side B (default: `side_b.json`).
    #[serde(default = "default_side_b")]
    pub side_b: PathBuf,
}

// Default value functions
fn default_quiet_interval() -> u64 {
    30
}

fn default_log_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}

fn default_operation_timeout() -> u64 {
    30
}

fn default_interval() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    2000
}

fn default_run_timeout() -> u64 {
    120
}

fn default_shutdown_grace() -> u64 {
    10
}

fn default_queue_capacity() -> usize {
    64
}

fn default_side_a() -> PathBuf {
    PathBuf::from("side_a.json")
}

fn default_side_b() -> PathBuf {
    PathBuf::from("side_b.json")
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            quiet_interval_secs: default_quiet_interval(),
            log_capacity: default_log_capacity(),
            operation_timeout_secs: default_operation_timeout(),
        }
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            run_timeout_secs: default_run_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for StoresSection {
    fn default() -> Self {
        Self {
            side_a: default_side_a(),
            side_b: default_side_b(),
        }
    }
}

impl EngineSection {
    /// Runtime settings for the reconciler.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            quiet_interval: Duration::from_secs(self.quiet_interval_secs),
            log_capacity: self.log_capacity,
            operation_timeout: Duration::from_secs(self.operation_timeout_secs),
        }
    }
}

impl SchedulerSection {
    /// Runtime settings for the scheduler.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs)),
            retry: RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_base_ms)),
            run_timeout: Duration::from_secs(self.run_timeout_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            queue_capacity: self.queue_capacity,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("scheduler.max_attempts", self.scheduler.max_attempts == 0),
            ("scheduler.queue_capacity", self.scheduler.queue_capacity == 0),
            ("scheduler.run_timeout_secs", self.scheduler.run_timeout_secs == 0),
            ("engine.log_capacity", self.engine.log_capacity == 0),
            ("engine.operation_timeout_secs", self.engine.operation_timeout_secs == 0),
        ];

        if let Some((field, _)) = checks.iter().find(|(_, invalid)| *invalid) {
            return Err(ConfigError::Invalid {
                field: field.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        // A run makes up to three sequential adapter calls (fetch, apply A,
        // apply B); each must hit its own timeout before the run budget expires.
        let adapter_budget = self
            .engine
            .operation_timeout_secs
            .saturating_mul(ADAPTER_CALLS_PER_RUN);
        if self.scheduler.run_timeout_secs <= adapter_budget {
            return Err(ConfigError::Invalid {
                field: "scheduler.run_timeout_secs".to_string(),
                reason: format!(
                    "must exceed {} times engine.operation_timeout_secs",
                    ADAPTER_CALLS_PER_RUN
                ),
            });
        }

        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid config value {field}: {reason}")]
    Invalid {
        /// Dotted name of the offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}
