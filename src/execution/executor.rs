//! Task execution worker.
//!
//! The `ExecutionWorker` runs exactly one attempt of a claimed task:
//! - Resolve the handler through the dispatch registry
//! - Invoke it under the execution timeout
//! - Record success, or let the retry policy choose between `RETRY` and `FAILED`

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{AbortHandle, JoinError};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::core::handler::{ErrorKind, Handler, HandlerError};
use crate::core::retry::{RetryDecision, RetryPolicy};
use crate::core::task::{Task, Transition};
use crate::core::types::{TaskId, TaskStatus};
use crate::events::{Event, EventBus};
use crate::registry::DispatchRegistry;
use crate::storage::{StorageError, TaskStore};

/// What happens to a handler that is still running when the timeout elapses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Abort the handler at its next await point.
    #[default]
    Cancel,
    /// Leave the handler running in the background and discard its result.
    Abandon,
}

/// A task this worker has successfully claimed.
///
/// Only [`ExecutionWorker::claim`] can build one, so a handler is never
/// invoked for a task whose claim was lost.
#[derive(Debug)]
pub struct ClaimedTask {
    task: Task,
}

impl ClaimedTask {
    /// The task as it was right after the claim.
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Identifier of the claimed task.
    pub fn id(&self) -> TaskId {
        self.task.id
    }

    /// 1-indexed number of the attempt this claim starts.
    pub fn attempt(&self) -> u32 {
        self.task.retry_count + 1
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The task is now `SUCCESS`.
    Succeeded,
    /// The task is now `RETRY`.
    RetryScheduled { retry_count: u32, delay: Duration },
    /// The task is now `FAILED`.
    Failed { kind: ErrorKind, retry_count: u32 },
    /// The outcome could not be written because the task was deleted or
    /// changed by another writer in the meantime.
    Superseded,
    /// The store rejected the outcome with a non-transient error.
    StoreFailed(String),
}

impl AttemptOutcome {
    /// Whether the task reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptOutcome::Succeeded | AttemptOutcome::Failed { .. })
    }
}

/// Runs single attempts of claimed tasks against a store and registry.
pub struct ExecutionWorker<S: TaskStore> {
    store: Arc<S>,
    registry: Arc<DispatchRegistry>,
    policy: RetryPolicy,
    execution_timeout: Duration,
    timeout_policy: TimeoutPolicy,
    store_retry_interval: Duration,
    event_bus: Option<Arc<EventBus>>,
}

impl<S: TaskStore + 'static> ExecutionWorker<S> {
    /// Create a worker with the default policy and a 60 second timeout.
    pub fn new(store: Arc<S>, registry: Arc<DispatchRegistry>) -> Self {
        Self {
            store,
            registry,
            policy: RetryPolicy::default(),
            execution_timeout: Duration::from_secs(60),
            timeout_policy: TimeoutPolicy::default(),
            store_retry_interval: Duration::from_secs(1),
            event_bus: None,
        }
    }

    /// Set the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the per-attempt execution timeout.
    pub fn with_execution_timeout(mut self, execution_timeout: Duration) -> Self {
        self.execution_timeout = execution_timeout;
        self
    }

    /// Set what happens to a handler that outlives the timeout.
    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }

    /// Set the pause between attempts to write to an unavailable store.
    pub fn with_store_retry_interval(mut self, interval: Duration) -> Self {
        self.store_retry_interval = interval;
        self
    }

    /// Set the event bus for lifecycle events.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// The retry policy in use.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The store this worker writes to.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Claim a due task for an attempt.
    ///
    /// Returns `Ok(None)` when the task is not claimable or another worker
    /// claimed it first.
    pub async fn claim(&self, task: Task) -> Result<Option<ClaimedTask>, StorageError> {
        let from = task.status;
        if !matches!(from, TaskStatus::Pending | TaskStatus::Retry) || task.is_deleted() {
            return Ok(None);
        }

        let started_at = Utc::now();
        let transition = Transition::Claim { started_at };
        if !self.store.transition(task.id, from, transition.clone()).await? {
            debug!(task_id = %task.id, "claim lost");
            return Ok(None);
        }

        let mut task = task;
        transition.apply(&mut task, started_at);
        let claimed = ClaimedTask { task };

        self.emit(Event::task_claimed(claimed.id(), claimed.attempt())).await;
        Ok(Some(claimed))
    }

    /// Run one attempt of a claimed task and record its outcome.
    pub async fn execute(&self, claimed: ClaimedTask) -> AttemptOutcome {
        let task = claimed.task;
        let start_time = Instant::now();

        let handler = match self.registry.resolve(&task.adapter_name, &task.method_name) {
            Ok(handler) => handler,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "handler resolution failed");
                let error = e.to_string();
                return self
                    .record_failure(task.id, task.retry_count, error, ErrorKind::Resolution, false)
                    .await;
            }
        };

        info!(
            task_id = %task.id,
            key = %task.key(),
            attempt = task.retry_count + 1,
            "executing task"
        );

        match self.invoke(handler, task.params.clone()).await {
            Ok(result) => {
                let transition = Transition::Succeed {
                    result,
                    finished_at: Utc::now(),
                };
                match self.write(task.id, transition).await {
                    Ok(true) => {
                        let duration = start_time.elapsed();
                        info!(task_id = %task.id, ?duration, "task succeeded");
                        self.emit(Event::task_succeeded(task.id, duration)).await;
                        AttemptOutcome::Succeeded
                    }
                    Ok(false) => superseded(task.id),
                    Err(e) => store_failed(task.id, e),
                }
            }
            Err(e) => {
                warn!(task_id = %task.id, kind = %e.kind(), error = %e, "task attempt failed");
                self.record_failure(task.id, task.retry_count, e.to_string(), e.kind(), true)
                    .await
            }
        }
    }

    /// Claim and execute in one step. `None` when the claim was lost.
    pub async fn run(&self, task: Task) -> Result<Option<AttemptOutcome>, StorageError> {
        match self.claim(task).await? {
            Some(claimed) => Ok(Some(self.execute(claimed).await)),
            None => Ok(None),
        }
    }

    /// Settle a `RUNNING` task whose attempt was interrupted by a process
    /// exit. The interruption counts as a transient failed attempt.
    pub async fn recover_interrupted(&self, task: &Task) -> AttemptOutcome {
        let outcome = self
            .record_failure(
                task.id,
                task.retry_count,
                "attempt interrupted before completion".to_string(),
                ErrorKind::Transient,
                true,
            )
            .await;
        if !matches!(outcome, AttemptOutcome::Superseded | AttemptOutcome::StoreFailed(_)) {
            self.emit(Event::task_recovered(task.id)).await;
        }
        outcome
    }

    /// Invoke the handler on its own task so a panic or timeout cannot take
    /// the worker down with it.
    ///
    /// Under [`TimeoutPolicy::Cancel`] the handler is aborted whenever this
    /// future stops early, on timeout or when the attempt itself is aborted.
    async fn invoke(
        &self,
        handler: Arc<dyn Handler>,
        params: Value,
    ) -> Result<Value, HandlerError> {
        let mut join = tokio::spawn(async move { handler.call(params).await });
        let _cancel = (self.timeout_policy == TimeoutPolicy::Cancel)
            .then(|| AbortOnDrop(join.abort_handle()));

        match timeout(self.execution_timeout, &mut join).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(join_error(e)),
            Err(_) => Err(HandlerError::Timeout(self.execution_timeout)),
        }
    }

    /// Move a `RUNNING` task to `RETRY` or `FAILED`.
    ///
    /// `counts_attempt` is false for failures that happen before the handler
    /// is invoked; those never bump `retry_count` and are never retried.
    async fn record_failure(
        &self,
        id: TaskId,
        previous_retries: u32,
        error: String,
        kind: ErrorKind,
        counts_attempt: bool,
    ) -> AttemptOutcome {
        let now = Utc::now();
        let (retry_count, decision) = if counts_attempt {
            let failed = previous_retries.saturating_add(1);
            (failed, self.policy.decide(failed, kind))
        } else {
            (previous_retries, RetryDecision::Terminal)
        };

        match decision {
            RetryDecision::RetryAfter(delay) => {
                let next_retry_at = retry_at(now, delay);
                let transition = Transition::Retry {
                    error: error.clone(),
                    retry_count,
                    next_retry_at,
                };
                match self.write(id, transition).await {
                    Ok(true) => {
                        info!(task_id = %id, retry_count, ?delay, "task scheduled for retry");
                        self.emit(Event::task_retry_scheduled(
                            id,
                            retry_count,
                            error,
                            delay,
                            next_retry_at,
                        ))
                        .await;
                        AttemptOutcome::RetryScheduled { retry_count, delay }
                    }
                    Ok(false) => superseded(id),
                    Err(e) => store_failed(id, e),
                }
            }
            RetryDecision::Terminal => {
                let transition = Transition::Fail {
                    error: error.clone(),
                    retry_count,
                    finished_at: now,
                };
                match self.write(id, transition).await {
                    Ok(true) => {
                        warn!(task_id = %id, retry_count, %kind, "task failed");
                        self.emit(Event::task_failed(id, error, kind, retry_count)).await;
                        AttemptOutcome::Failed { kind, retry_count }
                    }
                    Ok(false) => superseded(id),
                    Err(e) => store_failed(id, e),
                }
            }
        }
    }

    /// Write an outcome transition, retrying while the store is unavailable.
    async fn write(&self, id: TaskId, transition: Transition) -> Result<bool, StorageError> {
        loop {
            match self
                .store
                .transition(id, TaskStatus::Running, transition.clone())
                .await
            {
                Err(e) if e.is_transient() => {
                    warn!(
                        task_id = %id,
                        error = %e,
                        retry_in = ?self.store_retry_interval,
                        "store unavailable, retrying write"
                    );
                    sleep(self.store_retry_interval).await;
                }
                other => return other,
            }
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event).await;
        }
    }
}

/// Aborts the handler task when dropped. A no-op once the task has finished.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn retry_at(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn join_error(err: JoinError) -> HandlerError {
    if err.is_panic() {
        HandlerError::fatal("handler panicked")
    } else {
        HandlerError::fatal("handler was cancelled")
    }
}

fn superseded(id: TaskId) -> AttemptOutcome {
    info!(task_id = %id, "task changed during the attempt, outcome discarded");
    AttemptOutcome::Superseded
}

fn store_failed(id: TaskId, err: StorageError) -> AttemptOutcome {
    warn!(task_id = %id, error = %err, "could not record attempt outcome");
    AttemptOutcome::StoreFailed(err.to_string())
}
