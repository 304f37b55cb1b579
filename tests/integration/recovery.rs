//! Recovery scenario integration tests.
//!
//! Each test simulates a process that stopped mid-flight by writing task
//! state into an on-disk SQLite database, closing it, and starting a fresh
//! scheduler on the same file.

use chrono::{Duration as TimeDelta, Utc};
use homeguard::{Event, NewTask, SqliteStore, TaskStatus, TaskStore, Transition};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::common::{RecordingHandler, WAIT, camera_registry, fast_scheduler, wait_for_status};

async fn open(dir: &TempDir) -> SqliteStore {
    SqliteStore::new(db_path(dir.path())).await.unwrap()
}

fn db_path(dir: &Path) -> std::path::PathBuf {
    dir.join("homeguard.db")
}

/// Test: a task left RUNNING by a previous process is retried on restart.
#[tokio::test]
async fn test_interrupted_task_is_recovered_on_restart() {
    let dir = TempDir::new().unwrap();

    // Previous process: claims the task ten minutes ago, then dies
    let id = {
        let store = open(&dir).await;
        let task = store
            .create(NewTask::new("camera", "takePhoto", json!({})))
            .await
            .unwrap();
        let claimed = store
            .transition(
                task.id,
                TaskStatus::Pending,
                Transition::Claim {
                    started_at: Utc::now() - TimeDelta::minutes(10),
                },
            )
            .await
            .unwrap();
        assert!(claimed);
        store.close().await;
        task.id
    };

    // Restart
    let store = Arc::new(open(&dir).await);
    assert_eq!(store.get(id).await.unwrap().status, TaskStatus::Running);

    let (recorder, bus) = RecordingHandler::on_new_bus().await;
    let (handle, task) = fast_scheduler(Arc::clone(&store), Arc::new(camera_registry()))
        .with_event_bus(bus)
        .start()
        .await;

    let done = wait_for_status(store.as_ref(), id, TaskStatus::Success, WAIT).await;
    assert_eq!(done.retry_count, 1);
    assert!(done.error_message.is_none());

    handle.shutdown().await.unwrap();
    let _ = task.await;

    let events = recorder.events_for(id).await;
    assert!(matches!(events.first(), Some(Event::TaskRecovered { .. })));
}

/// Test: a recently started RUNNING task is left to its owner on restart.
#[tokio::test]
async fn test_recent_running_task_is_not_stolen() {
    let dir = TempDir::new().unwrap();

    let id = {
        let store = open(&dir).await;
        let task = store
            .create(NewTask::new("camera", "takePhoto", json!({})))
            .await
            .unwrap();
        store
            .transition(
                task.id,
                TaskStatus::Pending,
                Transition::Claim {
                    started_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        store.close().await;
        task.id
    };

    let store = Arc::new(open(&dir).await);
    let scheduler = fast_scheduler(Arc::clone(&store), Arc::new(camera_registry()));

    let recovered = scheduler.recover().await.unwrap();

    assert!(recovered.is_empty());
    assert_eq!(store.get(id).await.unwrap().status, TaskStatus::Running);
}

/// Test: a scheduled retry survives a restart with its schedule intact.
#[tokio::test]
async fn test_retry_state_persists_across_restart() {
    let dir = TempDir::new().unwrap();
    let next_retry_at = Utc::now() + TimeDelta::hours(1);

    let id = {
        let store = open(&dir).await;
        let task = store
            .create(NewTask::new("camera", "recordVideo", json!({ "seconds": 10 })))
            .await
            .unwrap();
        store
            .transition(
                task.id,
                TaskStatus::Pending,
                Transition::Claim {
                    started_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        store
            .transition(
                task.id,
                TaskStatus::Running,
                Transition::Retry {
                    error: "transient error: device busy".to_string(),
                    retry_count: 1,
                    next_retry_at,
                },
            )
            .await
            .unwrap();
        store.close().await;
        task.id
    };

    let store = Arc::new(open(&dir).await);
    let (handle, task) = fast_scheduler(Arc::clone(&store), Arc::new(camera_registry()))
        .start()
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stored = store.get(id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Retry);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.params, json!({ "seconds": 10 }));
    assert_eq!(
        stored.error_message.as_deref(),
        Some("transient error: device busy")
    );
    assert_eq!(
        stored.next_retry_at.map(|t| t.timestamp_millis()),
        Some(next_retry_at.timestamp_millis())
    );

    handle.shutdown().await.unwrap();
    let _ = task.await;
}
