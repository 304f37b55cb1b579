//! Worker pool bounds and single execution under contention.

use homeguard::{
    DispatchRegistry, HandlerError, InMemoryStore, NewTask, TaskStatus, TaskStore, handler_fn,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::common::{WAIT, fast_scheduler, wait_all_terminal, wait_for_status};

/// Tracks how many handler calls overlap.
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

fn gauged_registry(gauge: Arc<Gauge>) -> DispatchRegistry {
    let mut registry = DispatchRegistry::new();
    registry.adapter("siren").method(
        "sound",
        handler_fn(move |_params: Value| {
            let gauge = Arc::clone(&gauge);
            async move {
                let now = gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
                gauge.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                gauge.current.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, HandlerError>(Value::Null)
            }
        }),
    );
    registry
}

/// Test: no more than `max_workers` attempts ever run at once.
#[tokio::test]
async fn test_max_workers_bounds_parallel_attempts() {
    let gauge = Arc::new(Gauge::default());
    let store = Arc::new(InMemoryStore::new());
    let registry = Arc::new(gauged_registry(Arc::clone(&gauge)));
    let (handle, task) = fast_scheduler(Arc::clone(&store), registry)
        .with_max_workers(2)
        .start()
        .await;

    let mut ids = Vec::new();
    for _ in 0..8 {
        ids.push(handle.submit("siren", "sound", json!({})).await.unwrap());
    }
    wait_all_terminal(store.as_ref(), &ids, WAIT).await;

    for id in &ids {
        assert_eq!(store.get(*id).await.unwrap().status, TaskStatus::Success);
    }
    let peak = gauge.peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak concurrency was {}", peak);
    assert!(peak >= 1);

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: two schedulers sharing one store execute every task exactly once.
#[tokio::test]
async fn test_competing_schedulers_execute_each_task_once() {
    let executions: Arc<Mutex<HashMap<i64, usize>>> = Arc::new(Mutex::new(HashMap::new()));

    let mut registry = DispatchRegistry::new();
    let seen = Arc::clone(&executions);
    registry.adapter("lock").method(
        "engage",
        handler_fn(move |params: Value| {
            let seen = Arc::clone(&seen);
            async move {
                let n = params["n"].as_i64().unwrap_or(-1);
                *seen.lock().await.entry(n).or_insert(0) += 1;
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<_, HandlerError>(json!({ "n": n }))
            }
        }),
    );
    let registry = Arc::new(registry);
    let store = Arc::new(InMemoryStore::new());

    let (first, first_task) = fast_scheduler(Arc::clone(&store), Arc::clone(&registry))
        .start()
        .await;
    let (second, second_task) = fast_scheduler(Arc::clone(&store), Arc::clone(&registry))
        .start()
        .await;

    let mut ids = Vec::new();
    for n in 0..30 {
        let task = store
            .create(NewTask::new("lock", "engage", json!({ "n": n })))
            .await
            .unwrap();
        ids.push(task.id);
    }
    wait_all_terminal(store.as_ref(), &ids, WAIT).await;

    first.shutdown().await.unwrap();
    second.shutdown().await.unwrap();
    let _ = first_task.await;
    let _ = second_task.await;

    let executions = executions.lock().await;
    assert_eq!(executions.len(), 30);
    for n in 0..30 {
        assert_eq!(executions.get(&n), Some(&1), "task {} ran more than once", n);
    }
    for id in &ids {
        assert_eq!(store.get(*id).await.unwrap().status, TaskStatus::Success);
    }
}

/// Test: a peer's recovery pass never takes over an attempt that is still
/// within its execution timeout.
#[tokio::test]
async fn test_peer_recovery_leaves_live_attempts_alone() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = DispatchRegistry::new();
    let counter = Arc::clone(&calls);
    registry.adapter("garage").method(
        "close",
        handler_fn(move |_params: Value| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(400)).await;
                Ok::<_, HandlerError>(json!({ "closed": true }))
            }
        }),
    );
    let registry = Arc::new(registry);
    let store = Arc::new(InMemoryStore::new());

    let start = |store: &Arc<InMemoryStore>| {
        fast_scheduler(Arc::clone(store), Arc::clone(&registry))
            .with_execution_timeout(Duration::from_millis(500))
            .with_recovery_grace(Duration::from_secs(1))
            .with_recovery_interval(Duration::from_millis(20))
            .start()
    };
    let (first, first_task) = start(&store).await;
    let (second, second_task) = start(&store).await;

    let id = first.submit("garage", "close", json!({})).await.unwrap();
    let done = wait_for_status(store.as_ref(), id, TaskStatus::Success, WAIT).await;
    // Give both recovery passes time to look at the finished task
    tokio::time::sleep(Duration::from_millis(100)).await;

    first.shutdown().await.unwrap();
    second.shutdown().await.unwrap();
    let _ = first_task.await;
    let _ = second_task.await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(done.retry_count, 0);
    assert_eq!(store.get(id).await.unwrap().status, TaskStatus::Success);
}
