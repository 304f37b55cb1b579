//! Configuration type definitions.
//!
//! This module contains the typed sections of `homeguard.yaml` and their
//! conversion into engine settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::retry::{Backoff, RetryCondition, RetryPolicy};
use crate::execution::TimeoutPolicy;
use crate::scheduler::SchedulerSettings;

use super::error::ConfigError;

/// Engine configuration (homeguard.yaml).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scheduler loop and worker pool.
    pub engine: EngineSection,
    /// Retry policy for failed attempts.
    pub retry: RetryConfig,
    /// Task store backend.
    pub storage: StorageConfig,
    /// HTTP API.
    pub api: ApiSection,
    /// Log output.
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Check every section for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        if engine.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "engine.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if engine.max_workers == 0 {
            return Err(ConfigError::InvalidConfig(
                "engine.max_workers cannot be zero".into(),
            ));
        }
        if engine.max_batch == 0 {
            return Err(ConfigError::InvalidConfig(
                "engine.max_batch cannot be zero".into(),
            ));
        }
        if engine.execution_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "engine.execution_timeout_secs must be greater than zero".into(),
            ));
        }
        if engine.recovery_grace_secs <= engine.execution_timeout_secs {
            return Err(ConfigError::InvalidConfig(format!(
                "engine.recovery_grace_secs ({}) must exceed engine.execution_timeout_secs ({})",
                engine.recovery_grace_secs, engine.execution_timeout_secs
            )));
        }
        if engine.recovery_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "engine.recovery_interval_secs must be greater than zero".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        let retry = &self.retry;
        if retry.strategy != BackoffStrategy::Fixed && retry.base_secs > retry.max_secs {
            return Err(ConfigError::InvalidConfig(format!(
                "retry.base_secs ({}) exceeds retry.max_secs ({})",
                self.retry.base_secs, self.retry.max_secs
            )));
        }

        if self.storage.backend == StorageBackend::Sqlite && self.storage.path.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "storage.path is required for the sqlite backend".into(),
            ));
        }

        if self.api.enabled && self.api.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig("api.host cannot be empty".into()));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::InvalidConfig("logging.level cannot be empty".into()));
        }

        Ok(())
    }

    /// Retry policy described by the `retry` section.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.to_policy()
    }

    /// Scheduler settings described by the `engine` section.
    pub fn scheduler_settings(&self) -> SchedulerSettings {
        let engine = &self.engine;
        SchedulerSettings {
            poll_interval: Duration::from_millis(engine.poll_interval_ms),
            max_workers: engine.max_workers,
            max_batch: engine.max_batch,
            execution_timeout: Duration::from_secs(engine.execution_timeout_secs),
            timeout_policy: engine.timeout_policy,
            shutdown_timeout: Duration::from_secs(engine.shutdown_timeout_secs),
            recovery_grace: Duration::from_secs(engine.recovery_grace_secs),
            recovery_interval: Duration::from_secs(engine.recovery_interval_secs),
            store_retry_interval: Duration::from_millis(engine.store_retry_interval_ms),
        }
    }
}

/// Scheduler loop and worker pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Period of the polling tick in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of attempts in flight.
    pub max_workers: usize,
    /// Maximum number of due tasks fetched per tick.
    pub max_batch: usize,
    /// Deadline of one handler invocation in seconds.
    pub execution_timeout_secs: u64,
    /// What happens to a handler that outlives the deadline.
    pub timeout_policy: TimeoutPolicy,
    /// How long shutdown waits for in-flight attempts, in seconds.
    pub shutdown_timeout_secs: u64,
    /// Age in seconds after which a `RUNNING` task counts as interrupted.
    pub recovery_grace_secs: u64,
    /// Period in seconds of the recovery pass of a running engine.
    pub recovery_interval_secs: u64,
    /// Pause between retries of a failed store write, in milliseconds.
    pub store_retry_interval_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        let defaults = SchedulerSettings::default();
        Self {
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            max_workers: defaults.max_workers,
            max_batch: defaults.max_batch,
            execution_timeout_secs: defaults.execution_timeout.as_secs(),
            timeout_policy: defaults.timeout_policy,
            shutdown_timeout_secs: defaults.shutdown_timeout.as_secs(),
            recovery_grace_secs: defaults.recovery_grace.as_secs(),
            recovery_interval_secs: defaults.recovery_interval.as_secs(),
            store_retry_interval_ms: defaults.store_retry_interval.as_millis() as u64,
        }
    }
}

/// Backoff strategy names accepted in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every time.
    Fixed,
    /// Delay grows by `base_secs` per failed attempt.
    Linear,
    /// Delay doubles per failed attempt.
    #[default]
    Exponential,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of failed attempts before a task is given up.
    pub max_attempts: u32,
    /// How the delay grows between attempts.
    pub strategy: BackoffStrategy,
    /// First delay in seconds.
    pub base_secs: u64,
    /// Upper bound of the delay in seconds. Ignored by `fixed`.
    pub max_secs: u64,
    /// Which error kinds may be retried.
    pub retry_on: RetryCondition,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::Exponential,
            base_secs: 60,
            max_secs: 15 * 60,
            retry_on: RetryCondition::TransientOnly,
        }
    }
}

impl RetryConfig {
    /// Build the runtime policy.
    pub fn to_policy(&self) -> RetryPolicy {
        let base = Duration::from_secs(self.base_secs);
        let max = Duration::from_secs(self.max_secs);
        let backoff = match self.strategy {
            BackoffStrategy::Fixed => Backoff::Fixed { delay: base },
            BackoffStrategy::Linear => Backoff::Linear { base, max },
            BackoffStrategy::Exponential => Backoff::Exponential { base, max },
        };
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff,
            retry_on: self.retry_on,
        }
    }
}

/// Task store backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// In-memory storage (non-persistent).
    Memory,
    /// SQLite storage.
    #[default]
    Sqlite,
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend to use.
    pub backend: StorageBackend,
    /// Path to the database file (sqlite only).
    pub path: String,
    /// Connection pool size (sqlite only).
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: "homeguard.db".to_string(),
            max_connections: 5,
        }
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    /// Whether `serve` starts the HTTP API.
    pub enabled: bool,
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8565,
        }
    }
}

/// Log output formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}
