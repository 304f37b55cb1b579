//! Scheduler type definitions.
//!
//! This module contains error types, state enums, settings and command types
//! for the scheduler.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::core::types::TaskId;
use crate::execution::TimeoutPolicy;
use crate::storage::StorageError;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Task not found.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The submitted task is not well formed.
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

impl SchedulerError {
    /// Map a store `NotFound` for `id` to [`SchedulerError::TaskNotFound`].
    pub(crate) fn for_task(id: TaskId, err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => SchedulerError::TaskNotFound(id),
            other => SchedulerError::Storage(other),
        }
    }
}

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Scheduler is stopped.
    Stopped,
    /// Scheduler is running.
    Running,
    /// Scheduler is paused. In-flight attempts continue, nothing new is claimed.
    Paused,
}

impl SchedulerState {
    /// Lowercase name, as reported by the HTTP API.
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Stopped => "stopped",
            SchedulerState::Running => "running",
            SchedulerState::Paused => "paused",
        }
    }
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables of the scheduler loop and its workers.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    /// Period of the polling tick.
    pub poll_interval: Duration,
    /// Maximum number of attempts in flight at once.
    pub max_workers: usize,
    /// Maximum number of due tasks fetched per tick.
    pub max_batch: usize,
    /// Deadline of a single handler invocation.
    pub execution_timeout: Duration,
    /// What happens to a handler that outlives `execution_timeout`.
    pub timeout_policy: TimeoutPolicy,
    /// How long shutdown waits for in-flight attempts.
    pub shutdown_timeout: Duration,
    /// `RUNNING` tasks that started longer ago than this are treated as
    /// interrupted. Must exceed `execution_timeout`.
    pub recovery_grace: Duration,
    /// Period of the recovery pass of a running scheduler. Must be non-zero.
    pub recovery_interval: Duration,
    /// Pause between attempts to write an outcome to an unavailable store.
    pub store_retry_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_workers: 4,
            max_batch: 10,
            execution_timeout: Duration::from_secs(60),
            timeout_policy: TimeoutPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
            recovery_grace: Duration::from_secs(5 * 60),
            recovery_interval: Duration::from_secs(60),
            store_retry_interval: Duration::from_secs(1),
        }
    }
}

/// Commands that can be sent to the scheduler.
pub(crate) enum SchedulerCommand {
    /// Pause the scheduler.
    Pause { response: oneshot::Sender<()> },
    /// Resume the scheduler.
    Resume { response: oneshot::Sender<()> },
    /// Shutdown the scheduler.
    Shutdown { response: oneshot::Sender<()> },
}
