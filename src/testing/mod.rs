//! Testing utilities for users of the HomeGuard library.
//!
//! This module provides helpers for testing adapters and task execution:
//!
//! - [`FailingHandler`]: A handler that fails N times then succeeds
//! - [`ScriptedHandler`]: A handler that plays back a fixed list of outcomes
//! - [`TestHarness`]: Drives tasks attempt by attempt against in-memory storage
//! - [`wait_for_status`]: Polls a store until a task reaches a status

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::core::handler::{Handler, HandlerError};
use crate::core::retry::RetryPolicy;
use crate::core::task::{NewTask, Task};
use crate::core::types::{TaskId, TaskStatus};
use crate::execution::{AttemptOutcome, ExecutionWorker};
use crate::registry::DispatchRegistry;
use crate::storage::{InMemoryStore, TaskStore};

/// A handler that fails a set number of times, then succeeds.
///
/// Failures are transient, so they are retried under the default policy.
///
/// # Example
///
/// ```
/// use homeguard::testing::FailingHandler;
///
/// // Fails 2 times, then succeeds on the 3rd attempt
/// let handler = FailingHandler::new(2);
/// ```
pub struct FailingHandler {
    /// Mutex protecting failure state under concurrent calls.
    state: Mutex<FailingState>,
    error_message: String,
}

struct FailingState {
    failures_remaining: u32,
    call_count: u32,
}

impl FailingHandler {
    /// Create a handler that fails `fail_count` times then succeeds.
    pub fn new(fail_count: u32) -> Self {
        Self::with_error(fail_count, "intentional test failure")
    }

    /// Create a handler that fails with a custom error message.
    pub fn with_error(fail_count: u32, message: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(FailingState {
                failures_remaining: fail_count,
                call_count: 0,
            }),
            error_message: message.into(),
        }
    }

    /// A handler that never succeeds.
    pub fn always(message: impl Into<String>) -> Self {
        Self::with_error(u32::MAX, message)
    }

    /// Get the number of failures remaining before success.
    pub async fn failures_remaining(&self) -> u32 {
        self.state.lock().await.failures_remaining
    }

    /// Get the number of times this handler has been called.
    pub async fn call_count(&self) -> u32 {
        self.state.lock().await.call_count
    }
}

#[async_trait]
impl Handler for FailingHandler {
    async fn call(&self, params: Value) -> Result<Value, HandlerError> {
        let mut state = self.state.lock().await;
        state.call_count += 1;

        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            Err(HandlerError::transient(self.error_message.clone()))
        } else {
            Ok(params)
        }
    }
}

/// One scripted outcome of a [`ScriptedHandler`] call.
#[derive(Debug, Clone)]
pub enum Step {
    /// Return this value.
    Succeed(Value),
    /// Fail with a transient error.
    Transient(String),
    /// Fail with a validation error.
    Validation(String),
    /// Fail with a fatal error.
    Fatal(String),
    /// Sleep, then run the inner step.
    Delay(Duration, Box<Step>),
}

impl Step {
    fn into_result(self) -> Result<Value, HandlerError> {
        match self {
            Step::Succeed(value) => Ok(value),
            Step::Transient(msg) => Err(HandlerError::transient(msg)),
            Step::Validation(msg) => Err(HandlerError::validation(msg)),
            Step::Fatal(msg) => Err(HandlerError::fatal(msg)),
            Step::Delay(_, inner) => inner.into_result(),
        }
    }
}

/// A handler that plays back a list of outcomes, one per call.
///
/// Once the script is exhausted every further call runs the fallback step,
/// which defaults to succeeding with `null`. Parameters of every call are
/// recorded.
pub struct ScriptedHandler {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: Mutex<Vec<Value>>,
}

impl ScriptedHandler {
    /// Create a handler from a list of steps.
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            fallback: Step::Succeed(Value::Null),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Set the step run once the script is exhausted.
    pub fn then_always(mut self, step: Step) -> Self {
        self.fallback = step;
        self
    }

    /// Number of calls so far.
    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    /// Parameters of every call, in call order.
    pub async fn calls(&self) -> Vec<Value> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl Handler for ScriptedHandler {
    async fn call(&self, params: Value) -> Result<Value, HandlerError> {
        self.calls.lock().await.push(params);
        let step = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let mut current = step;
        while let Step::Delay(delay, inner) = current {
            tokio::time::sleep(delay).await;
            current = *inner;
        }
        current.into_result()
    }
}

/// Poll `store` until task `id` reaches `status`.
///
/// # Panics
///
/// Panics if the status is not reached within `timeout`.
pub async fn wait_for_status<S>(
    store: &S,
    id: TaskId,
    status: TaskStatus,
    timeout: Duration,
) -> Task
where
    S: TaskStore + ?Sized,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let task = store.get(id).await;
        match task {
            Ok(task) if task.status == status => return task,
            Ok(task) if tokio::time::Instant::now() >= deadline => {
                panic!(
                    "task {} did not reach {} within {:?}, last status {}",
                    id, status, timeout, task.status
                );
            }
            Err(e) if tokio::time::Instant::now() >= deadline => {
                panic!("task {} could not be read: {}", id, e);
            }
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
}

/// A test harness that drives tasks attempt by attempt against
/// in-memory storage, without a scheduler loop and without waiting for
/// retry delays.
///
/// # Example
///
/// ```ignore
/// use homeguard::testing::{FailingHandler, TestHarness};
///
/// let mut registry = DispatchRegistry::new();
/// registry.register("camera", "recordVideo", FailingHandler::new(1));
///
/// let harness = TestHarness::new(registry);
/// let task = harness.submit("camera", "recordVideo", json!({})).await;
/// let task = harness.run_to_completion(task.id).await;
/// assert_eq!(task.status, TaskStatus::Success);
/// ```
pub struct TestHarness {
    worker: ExecutionWorker<InMemoryStore>,
}

impl TestHarness {
    /// Maximum number of attempts `run_to_completion` makes.
    pub const MAX_ATTEMPTS: usize = 100;

    /// Create a harness with the default retry policy and a 5 second timeout.
    pub fn new(registry: DispatchRegistry) -> Self {
        let worker = ExecutionWorker::new(Arc::new(InMemoryStore::new()), Arc::new(registry))
            .with_execution_timeout(Duration::from_secs(5))
            .with_store_retry_interval(Duration::from_millis(10));
        Self { worker }
    }

    /// Set the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.worker = self.worker.with_retry_policy(policy);
        self
    }

    /// Set the per-attempt execution timeout.
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.worker = self.worker.with_execution_timeout(timeout);
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<InMemoryStore> {
        self.worker.store()
    }

    /// Create a `PENDING` task.
    pub async fn submit(&self, adapter: &str, method: &str, params: Value) -> Task {
        self.store()
            .create(NewTask::new(adapter, method, params))
            .await
            .expect("in-memory create cannot fail")
    }

    /// Run one attempt of the task, ignoring `next_retry_at`.
    ///
    /// Returns `None` when the task could not be claimed.
    pub async fn attempt(&self, id: TaskId) -> Option<AttemptOutcome> {
        let task = self.store().get(id).await.ok()?;
        self.worker.run(task).await.ok().flatten()
    }

    /// Run attempts until the task is terminal or can no longer be claimed.
    ///
    /// # Panics
    ///
    /// Panics after [`Self::MAX_ATTEMPTS`] attempts.
    pub async fn run_to_completion(&self, id: TaskId) -> Task {
        for _ in 0..Self::MAX_ATTEMPTS {
            if self.attempt(id).await.is_none() {
                break;
            }
        }
        let task = self
            .store()
            .get(id)
            .await
            .expect("task should exist in the harness store");
        assert!(
            task.status.is_terminal() || task.is_deleted(),
            "task {} still {} after {} attempts",
            id,
            task.status,
            Self::MAX_ATTEMPTS
        );
        task
    }
}
