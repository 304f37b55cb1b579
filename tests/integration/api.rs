//! API integration tests.
//!
//! These tests drive the router in-process with `tower::ServiceExt::oneshot`
//! against a live scheduler over an in-memory store.

use homeguard::api::{ApiState, build_router, create_api_state};
use homeguard::{InMemoryStore, TaskId, TaskQuery, TaskStatus, TaskStore};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

use crate::common::{WAIT, camera_registry, fast_scheduler, wait_for_status};

/// Create a test API state over a running scheduler with the camera adapter.
async fn create_test_state() -> (ApiState, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let scheduler = fast_scheduler(Arc::clone(&store), Arc::new(camera_registry()));
    let (handle, _task) = scheduler.start().await;
    (create_api_state(handle), store)
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_raw(uri: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

/// Test: Health endpoint responds with status ok.
#[tokio::test]
async fn test_health_endpoint() {
    let (state, _store) = create_test_state().await;

    let (status, json) = send(build_router(state), get("/api/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

/// Test: `/invoke` creates a task and answers with its id before it runs.
#[tokio::test]
async fn test_invoke_creates_task() {
    let (state, store) = create_test_state().await;

    let (status, json) = send(
        build_router(state),
        post_json(
            "/invoke",
            json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "camera.takePhoto",
                "params": { "resolution": "4k" }
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["jsonrpc"], "2.0");
    assert_eq!(json["id"], 7);
    assert!(json.get("error").is_none());
    assert_eq!(json["result"]["status"], "PENDING");

    let id = TaskId::new(json["result"]["task_id"].as_i64().unwrap());
    let done = wait_for_status(store.as_ref(), id, TaskStatus::Success, WAIT).await;
    assert_eq!(done.adapter_name, "camera");
    assert_eq!(done.method_name, "takePhoto");
    assert_eq!(done.params, json!({ "resolution": "4k" }));
}

/// Test: `/invoke` without params stores an empty object.
#[tokio::test]
async fn test_invoke_defaults_params() {
    let (state, store) = create_test_state().await;

    let (_, json) = send(
        build_router(state),
        post_json(
            "/invoke",
            json!({ "jsonrpc": "2.0", "id": "a", "method": "camera.takePhoto" }),
        ),
    )
    .await;

    let id = TaskId::new(json["result"]["task_id"].as_i64().unwrap());
    assert_eq!(store.get(id).await.unwrap().params, json!({}));
}

/// Test: a method without an adapter prefix is rejected as an invalid request.
#[tokio::test]
async fn test_invoke_rejects_malformed_method() {
    let (state, store) = create_test_state().await;

    let (status, json) = send(
        build_router(state),
        post_json(
            "/invoke",
            json!({ "jsonrpc": "2.0", "id": 1, "method": "takePhoto" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(json.get("result").is_none());
    assert_eq!(json["id"], 1);
    assert_eq!(json["error"]["code"], -32600);
    assert_eq!(
        json["error"]["message"],
        "method format should be adapter.method"
    );
    assert!(store.list(TaskQuery::new()).await.unwrap().is_empty());
}

/// Test: a body that is not JSON yields a parse error.
#[tokio::test]
async fn test_invoke_parse_error() {
    let (state, _store) = create_test_state().await;

    let (status, json) = send(build_router(state), post_raw("/invoke", "{not json")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["error"]["code"], -32700);
    assert!(json["id"].is_null());
}

/// Test: valid JSON of the wrong shape, or a foreign protocol version, is an
/// invalid request.
#[tokio::test]
async fn test_invoke_invalid_request() {
    let (state, _store) = create_test_state().await;
    let router = build_router(state);

    let (_, json) = send(router.clone(), post_json("/invoke", json!([1, 2, 3]))).await;
    assert_eq!(json["error"]["code"], -32600);

    let (_, json) = send(
        router,
        post_json(
            "/invoke",
            json!({ "jsonrpc": "1.0", "id": 3, "method": "camera.takePhoto" }),
        ),
    )
    .await;
    assert_eq!(json["error"]["code"], -32600);
    assert_eq!(json["id"], 3);
}

/// Test: REST submission returns 202 and the task can be fetched.
#[tokio::test]
async fn test_submit_and_get_task() {
    let (state, store) = create_test_state().await;
    let router = build_router(state);

    let (status, json) = send(
        router.clone(),
        post_json(
            "/api/tasks",
            json!({ "adapter": "camera", "method": "takePhoto", "params": { "zoom": 2 } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["status"], "PENDING");
    let raw_id = json["task_id"].as_i64().unwrap();

    wait_for_status(store.as_ref(), TaskId::new(raw_id), TaskStatus::Success, WAIT).await;

    let (status, json) = send(router, get(&format!("/api/tasks/{}", raw_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], raw_id);
    assert_eq!(json["adapter"], "camera");
    assert_eq!(json["method"], "takePhoto");
    assert_eq!(json["status"], "SUCCESS");
    assert_eq!(json["retry_count"], 0);
    assert_eq!(json["deleted"], false);
    assert_eq!(json["result"]["params"], json!({ "zoom": 2 }));
}

/// Test: REST submission with an empty adapter name is a bad request.
#[tokio::test]
async fn test_submit_rejects_empty_adapter() {
    let (state, _store) = create_test_state().await;

    let (status, json) = send(
        build_router(state),
        post_json("/api/tasks", json!({ "adapter": "", "method": "takePhoto" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
}

/// Test: listing filters by status, case-insensitively.
#[tokio::test]
async fn test_list_tasks_with_status_filter() {
    let (state, store) = create_test_state().await;
    let handle = state.handle.clone();
    let router = build_router(state);

    let ok = handle.submit("camera", "takePhoto", json!({})).await.unwrap();
    let bad = handle.submit("nonexistent", "foo", json!({})).await.unwrap();
    wait_for_status(store.as_ref(), ok, TaskStatus::Success, WAIT).await;
    wait_for_status(store.as_ref(), bad, TaskStatus::Failed, WAIT).await;

    let (status, json) = send(router.clone(), get("/api/tasks")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 2);
    // Newest first
    assert_eq!(json["tasks"][0]["id"], bad.get());

    let (_, json) = send(router.clone(), get("/api/tasks?status=failed")).await;
    assert_eq!(json["count"], 1);
    assert_eq!(json["tasks"][0]["id"], bad.get());
    assert_eq!(json["tasks"][0]["status"], "FAILED");

    let (_, json) = send(router, get("/api/tasks?status=SUCCESS&limit=5")).await;
    assert_eq!(json["count"], 1);
    assert_eq!(json["tasks"][0]["id"], ok.get());
}

/// Test: an unknown status filter is a bad request.
#[tokio::test]
async fn test_list_tasks_rejects_unknown_status() {
    let (state, _store) = create_test_state().await;

    let (status, json) = send(build_router(state), get("/api/tasks?status=sleeping")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
}

/// Test: unknown and malformed task ids.
#[tokio::test]
async fn test_get_unknown_task() {
    let (state, _store) = create_test_state().await;
    let router = build_router(state);

    let (status, json) = send(router.clone(), get("/api/tasks/999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");

    let (status, _) = send(router, get("/api/tasks/abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Test: deleting hides the task from listings but keeps it readable.
#[tokio::test]
async fn test_delete_task() {
    let (state, store) = create_test_state().await;
    let handle = state.handle.clone();
    let router = build_router(state);

    let id = handle.submit("camera", "takePhoto", json!({})).await.unwrap();
    wait_for_status(store.as_ref(), id, TaskStatus::Success, WAIT).await;

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/tasks/{}", id))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(router.clone(), request).await;
    assert_eq!(status, StatusCode::OK);

    let (_, json) = send(router.clone(), get("/api/tasks")).await;
    assert_eq!(json["count"], 0);

    let (status, json) = send(router.clone(), get(&format!("/api/tasks/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["deleted"], true);

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/tasks/999")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Test: Pause and resume scheduler endpoints.
#[tokio::test]
async fn test_pause_and_resume_endpoints() {
    let (state, _store) = create_test_state().await;
    let router = build_router(state);

    let (status, _) = send(router.clone(), post_raw("/api/scheduler/pause", "")).await;
    assert_eq!(status, StatusCode::OK);

    let (_, json) = send(router.clone(), get("/api/scheduler/state")).await;
    assert_eq!(json["state"], "paused");
    assert_eq!(json["is_paused"], true);

    let (status, _) = send(router.clone(), post_raw("/api/scheduler/resume", "")).await;
    assert_eq!(status, StatusCode::OK);

    let (_, json) = send(router, get("/api/scheduler/state")).await;
    assert_eq!(json["state"], "running");
    assert_eq!(json["is_running"], true);
}

/// Test: Control endpoints report unavailability once the scheduler stopped.
#[tokio::test]
async fn test_pause_after_shutdown_is_unavailable() {
    let (state, _store) = create_test_state().await;
    state.handle.shutdown().await.unwrap();
    let router = build_router(state);

    let (status, json) = send(router, post_raw("/api/scheduler/pause", "")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], "SERVICE_UNAVAILABLE");
}

/// Test: Adapters endpoint lists registered methods.
#[tokio::test]
async fn test_list_adapters_endpoint() {
    let (state, _store) = create_test_state().await;

    let (status, json) = send(build_router(state), get("/api/adapters")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 1);
    assert_eq!(json["adapters"][0]["name"], "camera");
    let methods: Vec<&str> = json["adapters"][0]["methods"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(methods.contains(&"takePhoto"));
    assert!(methods.contains(&"recordVideo"));
}
