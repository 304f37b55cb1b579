//! End-to-end submission scenarios against a live scheduler.

use homeguard::{ErrorKind, Event, InMemoryStore, TaskStatus, TaskStore};
use serde_json::json;
use std::sync::Arc;

use crate::common::{RecordingHandler, WAIT, camera_registry, fast_scheduler, wait_for_status};

/// Test: a successful handler call ends in SUCCESS with its result stored.
#[tokio::test]
async fn test_take_photo_succeeds() {
    let store = Arc::new(InMemoryStore::new());
    let registry = Arc::new(camera_registry());
    let (handle, task) = fast_scheduler(Arc::clone(&store), registry).start().await;

    let id = handle
        .submit("camera", "takePhoto", json!({ "resolution": "1080p" }))
        .await
        .unwrap();
    let done = wait_for_status(store.as_ref(), id, TaskStatus::Success, WAIT).await;

    assert_eq!(
        done.result,
        Some(json!({ "path": "/media/photo.jpg", "params": { "resolution": "1080p" } }))
    );
    assert_eq!(done.retry_count, 0);
    assert!(done.error_message.is_none());
    assert!(done.started_at.is_some());
    assert!(done.finished_at.is_some());
    assert!(done.next_retry_at.is_none());

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: a handler that keeps failing is retried with growing backoff and
/// ends in FAILED once the attempts are exhausted.
#[tokio::test]
async fn test_record_video_exhausts_retries() {
    let store = Arc::new(InMemoryStore::new());
    let registry = Arc::new(camera_registry());
    let (recorder, bus) = RecordingHandler::on_new_bus().await;
    let (handle, task) = fast_scheduler(Arc::clone(&store), registry)
        .with_event_bus(bus)
        .start()
        .await;

    let id = handle.submit("camera", "recordVideo", json!({})).await.unwrap();
    let failed = wait_for_status(store.as_ref(), id, TaskStatus::Failed, WAIT).await;

    assert_eq!(failed.retry_count, 3);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("transient error: device busy")
    );
    assert!(failed.next_retry_at.is_none());
    assert!(failed.result.is_none());

    // Drain in-flight attempts so every event has been delivered
    handle.shutdown().await.unwrap();
    let _ = task.await;

    let events = recorder.events_for(id).await;
    let claims = events
        .iter()
        .filter(|e| matches!(e, Event::TaskClaimed { .. }))
        .count();
    assert_eq!(claims, 3);

    let retry_times: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::TaskRetryScheduled {
                retry_count,
                next_retry_at,
                ..
            } => Some((*retry_count, *next_retry_at)),
            _ => None,
        })
        .collect();
    assert_eq!(retry_times.len(), 2);
    assert_eq!(retry_times[0].0, 1);
    assert_eq!(retry_times[1].0, 2);
    assert!(retry_times[1].1 > retry_times[0].1);

    assert!(matches!(
        events.last(),
        Some(Event::TaskFailed {
            kind: ErrorKind::Transient,
            retry_count: 3,
            ..
        })
    ));
}

/// Test: a task naming no registered handler fails once without being
/// counted as an attempt.
#[tokio::test]
async fn test_unknown_handler_fails_without_retry() {
    let store = Arc::new(InMemoryStore::new());
    let registry = Arc::new(camera_registry());
    let (recorder, bus) = RecordingHandler::on_new_bus().await;
    let (handle, task) = fast_scheduler(Arc::clone(&store), registry)
        .with_event_bus(bus)
        .start()
        .await;

    let id = handle.submit("nonexistent", "foo", json!({})).await.unwrap();
    let failed = wait_for_status(store.as_ref(), id, TaskStatus::Failed, WAIT).await;

    assert_eq!(failed.retry_count, 0);
    let message = failed.error_message.unwrap_or_default();
    assert!(message.contains("nonexistent"), "unexpected error: {}", message);

    handle.shutdown().await.unwrap();
    let _ = task.await;

    let events = recorder.events_for(id).await;
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, Event::TaskRetryScheduled { .. }))
    );
    assert!(events.iter().any(|e| matches!(
        e,
        Event::TaskFailed {
            kind: ErrorKind::Resolution,
            ..
        }
    )));
}

/// Test: submissions made while paused are stored and run after resume.
#[tokio::test]
async fn test_submissions_while_paused_run_after_resume() {
    let store = Arc::new(InMemoryStore::new());
    let registry = Arc::new(camera_registry());
    let (handle, task) = fast_scheduler(Arc::clone(&store), registry).start().await;

    handle.pause().await.unwrap();
    let first = handle.submit("camera", "takePhoto", json!({})).await.unwrap();
    let second = handle.submit("camera", "takePhoto", json!({})).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(store.get(first).await.unwrap().status, TaskStatus::Pending);

    handle.resume().await.unwrap();
    wait_for_status(store.as_ref(), first, TaskStatus::Success, WAIT).await;
    wait_for_status(store.as_ref(), second, TaskStatus::Success, WAIT).await;

    handle.shutdown().await.unwrap();
    let _ = task.await;
}
