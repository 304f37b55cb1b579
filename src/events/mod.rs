//! Lifecycle events and event handling.
//!
//! The worker and scheduler emit an event for every task state change,
//! enabling observability without coupling the engine to a log format.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::handler::ErrorKind;
use crate::core::types::TaskId;

/// Lifecycle events emitted by the engine.
#[derive(Debug, Clone)]
pub enum Event {
    /// A task was accepted by the scheduler handle.
    TaskSubmitted {
        task_id: TaskId,
        adapter: String,
        method: String,
        timestamp: Instant,
    },

    /// A worker claimed a task and is about to invoke its handler.
    TaskClaimed {
        task_id: TaskId,
        /// 1-indexed number of the attempt that is starting.
        attempt: u32,
        timestamp: Instant,
    },

    /// The handler returned a result.
    TaskSucceeded {
        task_id: TaskId,
        duration: Duration,
        timestamp: Instant,
    },

    /// The attempt failed and another one is scheduled.
    TaskRetryScheduled {
        task_id: TaskId,
        /// Failed attempts so far.
        retry_count: u32,
        error: String,
        delay: Duration,
        next_retry_at: DateTime<Utc>,
        timestamp: Instant,
    },

    /// The task ended in `FAILED`.
    TaskFailed {
        task_id: TaskId,
        error: String,
        kind: ErrorKind,
        retry_count: u32,
        timestamp: Instant,
    },

    /// A task left `RUNNING` by a previous process was moved through the
    /// retry policy at startup.
    TaskRecovered { task_id: TaskId, timestamp: Instant },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::TaskSubmitted { timestamp, .. } => *timestamp,
            Event::TaskClaimed { timestamp, .. } => *timestamp,
            Event::TaskSucceeded { timestamp, .. } => *timestamp,
            Event::TaskRetryScheduled { timestamp, .. } => *timestamp,
            Event::TaskFailed { timestamp, .. } => *timestamp,
            Event::TaskRecovered { timestamp, .. } => *timestamp,
        }
    }

    /// The task the event is about.
    pub fn task_id(&self) -> TaskId {
        match self {
            Event::TaskSubmitted { task_id, .. }
            | Event::TaskClaimed { task_id, .. }
            | Event::TaskSucceeded { task_id, .. }
            | Event::TaskRetryScheduled { task_id, .. }
            | Event::TaskFailed { task_id, .. }
            | Event::TaskRecovered { task_id, .. } => *task_id,
        }
    }

    /// Create a TaskSubmitted event.
    pub fn task_submitted(
        task_id: TaskId,
        adapter: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Event::TaskSubmitted {
            task_id,
            adapter: adapter.into(),
            method: method.into(),
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskClaimed event.
    pub fn task_claimed(task_id: TaskId, attempt: u32) -> Self {
        Event::TaskClaimed {
            task_id,
            attempt,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskSucceeded event.
    pub fn task_succeeded(task_id: TaskId, duration: Duration) -> Self {
        Event::TaskSucceeded {
            task_id,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskRetryScheduled event.
    pub fn task_retry_scheduled(
        task_id: TaskId,
        retry_count: u32,
        error: String,
        delay: Duration,
        next_retry_at: DateTime<Utc>,
    ) -> Self {
        Event::TaskRetryScheduled {
            task_id,
            retry_count,
            error,
            delay,
            next_retry_at,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskFailed event.
    pub fn task_failed(task_id: TaskId, error: String, kind: ErrorKind, retry_count: u32) -> Self {
        Event::TaskFailed {
            task_id,
            error,
            kind,
            retry_count,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskRecovered event.
    pub fn task_recovered(task_id: TaskId) -> Self {
        Event::TaskRecovered {
            task_id,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
