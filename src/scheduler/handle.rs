//! Scheduler handle for submitting tasks and controlling the scheduler.
//!
//! This module provides the `SchedulerHandle` type. Task submission and
//! queries go straight to the store; pause, resume and shutdown are sent to
//! the scheduler loop as commands.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock, mpsc, oneshot};
use tracing::info;

use crate::core::task::{NewTask, Task};
use crate::core::types::TaskId;
use crate::events::{Event, EventBus};
use crate::registry::DispatchRegistry;
use crate::storage::{TaskQuery, TaskStore};

use super::types::{SchedulerCommand, SchedulerError, SchedulerState};

/// Buffer size for the command channel between SchedulerHandle and Scheduler.
pub(crate) const COMMAND_CHANNEL_BUFFER: usize = 32;

/// Handle for submitting tasks and controlling the scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    pub(crate) command_tx: mpsc::Sender<SchedulerCommand>,
    pub(crate) state: Arc<RwLock<SchedulerState>>,
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) registry: Arc<DispatchRegistry>,
    pub(crate) wake: Arc<Notify>,
    pub(crate) event_bus: Arc<EventBus>,
}

impl SchedulerHandle {
    /// Helper to send a command that returns unit and wait for response.
    async fn send_unit_command(
        &self,
        build_command: impl FnOnce(oneshot::Sender<()>) -> SchedulerCommand,
        operation: &str,
    ) -> Result<(), SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build_command(response_tx))
            .await
            .map_err(|_| {
                SchedulerError::ChannelError(format!("failed to send {} command", operation))
            })?;

        response_rx.await.map_err(|_| {
            SchedulerError::ChannelError(format!("failed to receive {} response", operation))
        })?;

        Ok(())
    }

    /// Submit a task and return its id without waiting for it to run.
    ///
    /// The handler is resolved at execution time, so an unregistered pair is
    /// accepted here and ends in `FAILED` after its first attempt.
    pub async fn submit(
        &self,
        adapter: impl Into<String>,
        method: impl Into<String>,
        params: Value,
    ) -> Result<TaskId, SchedulerError> {
        self.submit_task(NewTask::new(adapter, method, params)).await
    }

    /// Submit a prepared task request.
    pub async fn submit_task(&self, new: NewTask) -> Result<TaskId, SchedulerError> {
        if new.adapter_name.trim().is_empty() {
            return Err(SchedulerError::InvalidTask("adapter name is empty".into()));
        }
        if new.method_name.trim().is_empty() {
            return Err(SchedulerError::InvalidTask("method name is empty".into()));
        }

        let task = self.store.create(new).await?;
        info!(task_id = %task.id, key = %task.key(), "task submitted");
        self.event_bus
            .emit(Event::task_submitted(task.id, &task.adapter_name, &task.method_name))
            .await;
        self.wake.notify_one();
        Ok(task.id)
    }

    /// Current snapshot of a task.
    pub async fn status(&self, id: TaskId) -> Result<Task, SchedulerError> {
        self.store
            .get(id)
            .await
            .map_err(|e| SchedulerError::for_task(id, e))
    }

    /// List non-deleted tasks, newest first.
    pub async fn list(&self, query: TaskQuery) -> Result<Vec<Task>, SchedulerError> {
        Ok(self.store.list(query).await?)
    }

    /// Soft-delete a task. An attempt already in flight runs to completion
    /// but its outcome is discarded.
    pub async fn delete(&self, id: TaskId) -> Result<(), SchedulerError> {
        self.store
            .soft_delete(id)
            .await
            .map_err(|e| SchedulerError::for_task(id, e))?;
        info!(task_id = %id, "task deleted");
        Ok(())
    }

    /// The registry the scheduler dispatches through.
    pub fn registry(&self) -> &Arc<DispatchRegistry> {
        &self.registry
    }

    /// Pause the scheduler.
    ///
    /// While paused, no new attempts are claimed; submissions are still accepted.
    pub async fn pause(&self) -> Result<(), SchedulerError> {
        self.send_unit_command(|response| SchedulerCommand::Pause { response }, "pause")
            .await
    }

    /// Resume the scheduler after being paused.
    pub async fn resume(&self) -> Result<(), SchedulerError> {
        self.send_unit_command(|response| SchedulerCommand::Resume { response }, "resume")
            .await
    }

    /// Shutdown the scheduler, waiting for in-flight attempts up to the
    /// configured shutdown timeout.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.send_unit_command(
            |response| SchedulerCommand::Shutdown { response },
            "shutdown",
        )
        .await
    }

    /// Get the current scheduler state.
    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    /// Check if the scheduler is running.
    pub async fn is_running(&self) -> bool {
        *self.state.read().await == SchedulerState::Running
    }

    /// Check if the scheduler is paused.
    pub async fn is_paused(&self) -> bool {
        *self.state.read().await == SchedulerState::Paused
    }
}
