//! Common test utilities shared across integration tests.

use async_trait::async_trait;
use homeguard::{
    DispatchRegistry, Event, EventBus, EventHandler, HandlerError, RetryPolicy, Scheduler,
    SchedulerSettings, TaskId, TaskStatus, TaskStore, handler_fn,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub use homeguard::testing::wait_for_status;

/// Generous upper bound for anything that should happen "soon".
pub const WAIT: Duration = Duration::from_secs(5);

/// Registry with a camera adapter: `takePhoto` succeeds, `recordVideo`
/// always reports the device busy.
pub fn camera_registry() -> DispatchRegistry {
    let mut registry = DispatchRegistry::new();
    registry
        .adapter("camera")
        .method(
            "takePhoto",
            handler_fn(|params: Value| async move {
                Ok::<_, HandlerError>(json!({ "path": "/media/photo.jpg", "params": params }))
            }),
        )
        .method(
            "recordVideo",
            handler_fn(|_params: Value| async move {
                Err::<Value, _>(HandlerError::transient("device busy"))
            }),
        );
    registry
}

/// Settings that make a scheduler react within tens of milliseconds.
pub fn fast_settings() -> SchedulerSettings {
    SchedulerSettings {
        poll_interval: Duration::from_millis(20),
        max_workers: 4,
        max_batch: 10,
        execution_timeout: Duration::from_secs(2),
        shutdown_timeout: Duration::from_secs(5),
        store_retry_interval: Duration::from_millis(10),
        ..SchedulerSettings::default()
    }
}

/// Three attempts, exponential backoff from 20ms.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::exponential(3, Duration::from_millis(20), Duration::from_millis(200))
}

/// A scheduler over shared store and registry with fast settings.
pub fn fast_scheduler<S: TaskStore + 'static>(
    store: Arc<S>,
    registry: Arc<DispatchRegistry>,
) -> Scheduler<S> {
    Scheduler::with_storage(store, registry)
        .with_settings(fast_settings())
        .with_retry_policy(fast_retry())
}

/// Wait until every task in `ids` is terminal.
pub async fn wait_all_terminal(store: &dyn TaskStore, ids: &[TaskId], timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let mut pending = 0;
        for id in ids {
            if !store.get(*id).await.unwrap().status.is_terminal() {
                pending += 1;
            }
        }
        if pending == 0 {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("Timeout waiting for tasks, {} still not terminal", pending);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Recording event handler for verifying events.
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    /// Register a new recorder on a fresh bus.
    pub async fn on_new_bus() -> (Arc<Self>, Arc<EventBus>) {
        let recorder = Self::new();
        let bus = Arc::new(EventBus::new());
        bus.register(recorder.clone()).await;
        (recorder, bus)
    }

    pub async fn events_for(&self, id: TaskId) -> Vec<Event> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.task_id() == id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// Status of a task, for terse assertions.
pub async fn status_of(store: &dyn TaskStore, id: TaskId) -> TaskStatus {
    store.get(id).await.unwrap().status
}
