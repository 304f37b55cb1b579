//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{StorageError, TaskQuery, TaskStore, check_edge};
use crate::core::task::{NewTask, Task, Transition};
use crate::core::types::{TaskId, TaskStatus};

struct Inner {
    tasks: BTreeMap<TaskId, Task>,
    next_id: i64,
}

/// In-memory storage backend.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                tasks: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn create(&self, task: NewTask) -> Result<Task, StorageError> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        let id = TaskId::new(inner.next_id);
        inner.next_id += 1;

        let task = Task::pending(id, task, Utc::now());
        inner.tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn get(&self, id: TaskId) -> Result<Task, StorageError> {
        let inner = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        inner
            .tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found(id))
    }

    async fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>, StorageError> {
        let inner = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut due: Vec<_> = inner
            .tasks
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        due.truncate(limit);
        Ok(due)
    }

    async fn transition(
        &self,
        id: TaskId,
        from: TaskStatus,
        transition: Transition,
    ) -> Result<bool, StorageError> {
        check_edge(id, from, &transition)?;

        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found(id))?;

        if task.status != from || task.is_deleted() {
            return Ok(false);
        }
        transition.apply(task, Utc::now());
        Ok(true)
    }

    async fn soft_delete(&self, id: TaskId) -> Result<(), StorageError> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        let task = inner
            .tasks
            .get_mut(&id)
            .filter(|t| !t.is_deleted())
            .ok_or_else(|| StorageError::not_found(id))?;

        let now = Utc::now();
        task.deleted_at = Some(now);
        task.updated_at = now;
        Ok(())
    }

    async fn list(&self, query: TaskQuery) -> Result<Vec<Task>, StorageError> {
        let inner = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        // Ids are assigned in creation order, so reverse id order is newest first.
        let result = inner
            .tasks
            .values()
            .rev()
            .filter(|t| !t.is_deleted())
            .filter(|t| query.status.is_none_or(|s| t.status == s))
            .take(query.effective_limit())
            .cloned()
            .collect();
        Ok(result)
    }

    async fn list_running_started_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Task>, StorageError> {
        let inner = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        let result = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running && !t.is_deleted())
            .filter(|t| t.started_at.is_some_and(|at| at < cutoff))
            .take(limit)
            .cloned()
            .collect();
        Ok(result)
    }
}
