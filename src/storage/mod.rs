//! Storage abstraction for persisting task records.
//!
//! This module provides a trait-based storage abstraction with
//! pluggable backends (in-memory, SQLite).

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::core::task::{NewTask, Task, Transition};
use crate::core::types::{TaskId, TaskStatus};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested status change is not an edge of the task state machine.
    #[error("invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// The backend could not be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

impl StorageError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }

    pub(crate) fn not_found(id: TaskId) -> Self {
        StorageError::NotFound(format!("task: {}", id))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

/// Filter for listing tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TaskQuery {
    /// Only tasks in this status.
    pub status: Option<TaskStatus>,
    /// Maximum number of tasks returned.
    pub limit: Option<usize>,
}

impl TaskQuery {
    /// Default page size when no limit is given.
    pub const DEFAULT_LIMIT: usize = 100;

    /// Query every status, default limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the maximum number of results.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }
}

/// Refuse edges that are not part of the state machine before touching storage.
pub(crate) fn check_edge(
    id: TaskId,
    from: TaskStatus,
    transition: &Transition,
) -> Result<(), StorageError> {
    let to = transition.target();
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StorageError::InvalidTransition { id, from, to })
    }
}

/// Durable task record store.
///
/// `transition` is the only way a task's status changes after creation, and
/// it is an atomic compare-and-set on the current status: of several
/// concurrent callers presenting the same `from`, exactly one gets `true`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new `PENDING` task and return the stored record.
    async fn create(&self, task: NewTask) -> Result<Task, StorageError>;

    /// Get a snapshot of a task. Soft-deleted tasks are still returned.
    async fn get(&self, id: TaskId) -> Result<Task, StorageError>;

    /// Tasks eligible for an attempt at `now`: `PENDING`, or `RETRY` with
    /// `next_retry_at <= now`. Oldest first, at most `limit`.
    async fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>, StorageError>;

    /// Apply `transition` if the task is currently in `from` and not deleted.
    ///
    /// Returns `Ok(false)` when the guard does not hold (another writer won).
    async fn transition(
        &self,
        id: TaskId,
        from: TaskStatus,
        transition: Transition,
    ) -> Result<bool, StorageError>;

    /// Mark a task as deleted. It stays readable through `get`.
    async fn soft_delete(&self, id: TaskId) -> Result<(), StorageError>;

    /// List non-deleted tasks, newest first.
    async fn list(&self, query: TaskQuery) -> Result<Vec<Task>, StorageError>;

    /// `RUNNING` tasks whose attempt started before `cutoff`. Used by crash recovery.
    async fn list_running_started_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Task>, StorageError>;
}
