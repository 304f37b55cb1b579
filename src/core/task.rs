//! Persisted task record and the transitions applied to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{TaskId, TaskStatus};

/// A durable unit of work: one invocation of `adapter_name.method_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned identifier.
    pub id: TaskId,
    /// Adapter half of the handler key.
    pub adapter_name: String,
    /// Method half of the handler key.
    pub method_name: String,
    /// Passed verbatim to the handler.
    pub params: Value,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Handler output, set only on success.
    pub result: Option<Value>,
    /// Latest failure description.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Start of the latest attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// End of the last attempt, set in terminal states.
    pub finished_at: Option<DateTime<Utc>>,
    /// Earliest time of the next attempt, set only in `RETRY`.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Number of failed handler attempts so far.
    pub retry_count: u32,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Build a fresh `PENDING` record. Used by the stores on `create`.
    pub(crate) fn pending(id: TaskId, new: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            adapter_name: new.adapter_name,
            method_name: new.method_name,
            params: new.params,
            status: TaskStatus::Pending,
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            next_retry_at: None,
            retry_count: 0,
            deleted_at: None,
        }
    }

    /// `adapter.method` key, as used in logs and the invoke endpoint.
    pub fn key(&self) -> String {
        format!("{}.{}", self.adapter_name, self.method_name)
    }

    /// Whether the task has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether the scheduler may pick the task up at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.is_deleted() {
            return false;
        }
        match self.status {
            TaskStatus::Pending => true,
            TaskStatus::Retry => self.next_retry_at.is_some_and(|at| at <= now),
            _ => false,
        }
    }
}

/// Caller-supplied part of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub adapter_name: String,
    pub method_name: String,
    #[serde(default)]
    pub params: Value,
}

impl NewTask {
    /// Create a new task request.
    pub fn new(adapter: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            adapter_name: adapter.into(),
            method_name: method.into(),
            params,
        }
    }
}

/// A status change together with the fields it writes.
///
/// Each variant maps to exactly one target status; the source status is
/// supplied separately to the store's compare-and-set.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Claim for an attempt: `PENDING`/`RETRY` -> `RUNNING`.
    Claim { started_at: DateTime<Utc> },
    /// Attempt succeeded: `RUNNING` -> `SUCCESS`.
    Succeed {
        result: Value,
        finished_at: DateTime<Utc>,
    },
    /// Attempt failed for good: `RUNNING` -> `FAILED`.
    Fail {
        error: String,
        retry_count: u32,
        finished_at: DateTime<Utc>,
    },
    /// Attempt failed, another one is scheduled: `RUNNING` -> `RETRY`.
    Retry {
        error: String,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    },
}

impl Transition {
    /// Status the task is in after the transition.
    pub fn target(&self) -> TaskStatus {
        match self {
            Transition::Claim { .. } => TaskStatus::Running,
            Transition::Succeed { .. } => TaskStatus::Success,
            Transition::Fail { .. } => TaskStatus::Failed,
            Transition::Retry { .. } => TaskStatus::Retry,
        }
    }

    /// Write the transition into `task`. The caller has already checked the
    /// source status.
    pub fn apply(self, task: &mut Task, now: DateTime<Utc>) {
        task.status = self.target();
        task.updated_at = now;
        match self {
            Transition::Claim { started_at } => {
                task.started_at = Some(started_at);
                task.finished_at = None;
                task.next_retry_at = None;
            }
            Transition::Succeed {
                result,
                finished_at,
            } => {
                task.result = Some(result);
                task.error_message = None;
                task.finished_at = Some(finished_at);
                task.next_retry_at = None;
            }
            Transition::Fail {
                error,
                retry_count,
                finished_at,
            } => {
                task.result = None;
                task.error_message = Some(error);
                task.retry_count = retry_count;
                task.finished_at = Some(finished_at);
                task.next_retry_at = None;
            }
            Transition::Retry {
                error,
                retry_count,
                next_retry_at,
            } => {
                task.result = None;
                task.error_message = Some(error);
                task.retry_count = retry_count;
                task.finished_at = None;
                task.next_retry_at = Some(next_retry_at);
            }
        }
    }
}
