//! Graceful shutdown integration tests.
//!
//! Tests that verify the scheduler waits for in-flight attempts before
//! exiting, and that attempts outliving the shutdown timeout are left for
//! recovery.

use homeguard::{
    DispatchRegistry, HandlerError, InMemoryStore, SchedulerState, TaskStatus, TaskStore,
    handler_fn,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::common::{WAIT, fast_scheduler, status_of, wait_for_status};

/// A `door.lock` handler that takes `delay` and flags when it finishes.
fn slow_registry(delay: Duration, finished: Arc<AtomicBool>) -> DispatchRegistry {
    let mut registry = DispatchRegistry::new();
    registry.adapter("door").method(
        "lock",
        handler_fn(move |_params: Value| {
            let finished = Arc::clone(&finished);
            async move {
                tokio::time::sleep(delay).await;
                finished.store(true, Ordering::SeqCst);
                Ok::<_, HandlerError>(json!({ "locked": true }))
            }
        }),
    );
    registry
}

/// Test: shutdown waits for a running attempt to finish.
#[tokio::test]
async fn test_shutdown_waits_for_running_attempt() {
    let finished = Arc::new(AtomicBool::new(false));
    let store = Arc::new(InMemoryStore::new());
    let registry = Arc::new(slow_registry(
        Duration::from_millis(300),
        Arc::clone(&finished),
    ));
    let (handle, task) = fast_scheduler(Arc::clone(&store), registry).start().await;

    let id = handle.submit("door", "lock", json!({})).await.unwrap();
    wait_for_status(store.as_ref(), id, TaskStatus::Running, WAIT).await;

    handle.shutdown().await.unwrap();

    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(status_of(store.as_ref(), id).await, TaskStatus::Success);
    assert_eq!(handle.state().await, SchedulerState::Stopped);

    tokio::time::timeout(WAIT, task)
        .await
        .expect("scheduler loop should exit after shutdown")
        .unwrap();
}

/// Test: an attempt outliving the shutdown timeout is cancelled, stays RUNNING
/// and is recovered by the next scheduler on the same store.
#[tokio::test]
async fn test_shutdown_timeout_leaves_attempt_for_recovery() {
    let finished = Arc::new(AtomicBool::new(false));
    let store = Arc::new(InMemoryStore::new());
    let registry = Arc::new(slow_registry(
        Duration::from_millis(1500),
        Arc::clone(&finished),
    ));
    let (handle, task) = fast_scheduler(Arc::clone(&store), Arc::clone(&registry))
        .with_shutdown_timeout(Duration::from_millis(100))
        .start()
        .await;

    let id = handle.submit("door", "lock", json!({})).await.unwrap();
    wait_for_status(store.as_ref(), id, TaskStatus::Running, WAIT).await;

    handle.shutdown().await.unwrap();
    let _ = task.await;

    assert!(!finished.load(Ordering::SeqCst));
    assert_eq!(status_of(store.as_ref(), id).await, TaskStatus::Running);

    // The handler never completes and nothing writes an outcome later on
    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert!(!finished.load(Ordering::SeqCst));
    assert_eq!(status_of(store.as_ref(), id).await, TaskStatus::Running);

    let restarted =
        fast_scheduler(Arc::clone(&store), registry).with_recovery_grace(Duration::ZERO);
    let recovered = restarted.recover().await.unwrap();

    assert_eq!(recovered, vec![id]);
    let stored = store.get(id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Retry);
    assert_eq!(stored.retry_count, 1);
    assert!(stored.next_retry_at.is_some());
}

/// Test: tasks submitted after shutdown are stored but not executed.
#[tokio::test]
async fn test_no_attempts_after_shutdown() {
    let finished = Arc::new(AtomicBool::new(false));
    let store = Arc::new(InMemoryStore::new());
    let registry = Arc::new(slow_registry(Duration::ZERO, Arc::clone(&finished)));
    let (handle, task) = fast_scheduler(Arc::clone(&store), registry).start().await;

    handle.shutdown().await.unwrap();
    let _ = task.await;

    let id = handle.submit("door", "lock", json!({})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(status_of(store.as_ref(), id).await, TaskStatus::Pending);
    assert!(!finished.load(Ordering::SeqCst));
}
