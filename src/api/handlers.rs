//! API request handlers.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::core::task::NewTask;
use crate::core::types::{TaskId, TaskStatus};
use crate::registry::parse_method_path;
use crate::scheduler::{SchedulerError, SchedulerHandle};
use crate::storage::TaskQuery;

use super::errors::ApiError;
use super::responses::{
    AdapterListResponse, HealthResponse, JSONRPC_VERSION, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, MessageResponse, SchedulerStateResponse, SubmitRequest, SubmitResponse,
    TaskListResponse, TaskResponse,
};

/// Shared application state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub handle: SchedulerHandle,
}

/// Query parameters for the list_tasks endpoint.
#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Get scheduler state.
pub async fn get_scheduler_state(State(state): State<ApiState>) -> Json<SchedulerStateResponse> {
    let scheduler_state = state.handle.state().await;
    Json(SchedulerStateResponse::from(scheduler_state))
}

/// Pause the scheduler.
pub async fn pause_scheduler(
    State(state): State<ApiState>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.handle.pause().await?;
    Ok(Json(MessageResponse {
        message: "scheduler paused".to_string(),
    }))
}

/// Resume the scheduler.
pub async fn resume_scheduler(
    State(state): State<ApiState>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.handle.resume().await?;
    Ok(Json(MessageResponse {
        message: "scheduler resumed".to_string(),
    }))
}

/// List registered adapters and their methods.
pub async fn list_adapters(State(state): State<ApiState>) -> Json<AdapterListResponse> {
    Json(AdapterListResponse::from(state.handle.registry().as_ref()))
}

/// Submit a task.
pub async fn submit_task(
    State(state): State<ApiState>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let task_id = state
        .handle
        .submit_task(NewTask::new(request.adapter, request.method, request.params))
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            task_id: task_id.get(),
            status: TaskStatus::Pending.to_string(),
        }),
    ))
}

/// List tasks, newest first.
pub async fn list_tasks(
    State(state): State<ApiState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let mut task_query = TaskQuery::new();
    if let Some(status) = query.status.as_deref() {
        let status = status
            .parse::<TaskStatus>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        task_query = task_query.with_status(status);
    }
    if let Some(limit) = query.limit {
        task_query = task_query.with_limit(limit);
    }

    let tasks = state.handle.list(task_query).await?;
    let tasks: Vec<TaskResponse> = tasks.into_iter().map(TaskResponse::from).collect();
    let count = tasks.len();
    Ok(Json(TaskListResponse { tasks, count }))
}

/// Get a specific task.
pub async fn get_task(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task_id = parse_task_id(&task_id)?;
    let task = state.handle.status(task_id).await?;
    Ok(Json(TaskResponse::from(task)))
}

/// Soft-delete a task.
pub async fn delete_task(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let task_id = parse_task_id(&task_id)?;
    state.handle.delete(task_id).await?;
    Ok(Json(MessageResponse {
        message: format!("task {} deleted", task_id),
    }))
}

/// JSON-RPC entry point: `{"method": "adapter.method", "params": ...}`
/// creates a task and answers with its id straight away.
pub async fn invoke(State(state): State<ApiState>, body: Bytes) -> Json<JsonRpcResponse> {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            let code = if serde_json::from_slice::<Value>(&body).is_ok() {
                JsonRpcError::INVALID_REQUEST
            } else {
                JsonRpcError::PARSE_ERROR
            };
            return Json(JsonRpcResponse::error(Value::Null, code, e.to_string()));
        }
    };

    info!(method = %request.method, "rpc request");

    if request.jsonrpc != JSONRPC_VERSION {
        return Json(JsonRpcResponse::error(
            request.id,
            JsonRpcError::INVALID_REQUEST,
            format!("unsupported jsonrpc version: {}", request.jsonrpc),
        ));
    }

    let (adapter, method) = match parse_method_path(&request.method) {
        Ok(pair) => pair,
        Err(_) => {
            return Json(JsonRpcResponse::error(
                request.id,
                JsonRpcError::INVALID_REQUEST,
                "method format should be adapter.method",
            ));
        }
    };

    let params = request.params.unwrap_or_else(|| json!({}));
    match state.handle.submit(adapter, method, params).await {
        Ok(task_id) => Json(JsonRpcResponse::success(
            request.id,
            json!({ "task_id": task_id.get(), "status": TaskStatus::Pending.as_str() }),
        )),
        Err(SchedulerError::InvalidTask(msg)) => Json(JsonRpcResponse::error(
            request.id,
            JsonRpcError::INVALID_REQUEST,
            msg,
        )),
        Err(e) => Json(JsonRpcResponse::error(
            request.id,
            JsonRpcError::INTERNAL_ERROR,
            e.to_string(),
        )),
    }
}

fn parse_task_id(raw: &str) -> Result<TaskId, ApiError> {
    raw.parse::<i64>()
        .map(TaskId::new)
        .map_err(|_| ApiError::BadRequest(format!("invalid task id: {}", raw)))
}
