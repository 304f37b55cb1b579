//! HTTP API module for the HomeGuard engine.
//!
//! Provides the JSON-RPC `/invoke` endpoint plus REST endpoints for
//! submitting and querying tasks and controlling the scheduler.

mod errors;
mod handlers;
mod responses;

pub use errors::ApiError;
pub use handlers::ApiState;
pub use responses::*;

use axum::{
    Router,
    routing::{get, post},
};
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiSection;
use crate::scheduler::SchedulerHandle;

/// Configuration for the API server.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8565,
        }
    }
}

impl From<&ApiSection> for ApiConfig {
    fn from(section: &ApiSection) -> Self {
        Self::new(section.host.clone(), section.port)
    }
}

impl ApiConfig {
    /// Create a new API config with custom host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Get the socket address.
    pub fn socket_addr(&self) -> io::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }
}

/// Build the API router with all endpoints.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        // JSON-RPC
        .route("/invoke", post(handlers::invoke))
        // Health check
        .route("/api/health", get(handlers::health))
        // Scheduler control
        .route("/api/scheduler/state", get(handlers::get_scheduler_state))
        .route("/api/scheduler/pause", post(handlers::pause_scheduler))
        .route("/api/scheduler/resume", post(handlers::resume_scheduler))
        // Adapters
        .route("/api/adapters", get(handlers::list_adapters))
        // Tasks
        .route(
            "/api/tasks",
            get(handlers::list_tasks).post(handlers::submit_task),
        )
        .route(
            "/api/tasks/{task_id}",
            get(handlers::get_task).delete(handlers::delete_task),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Create the API state from a scheduler handle.
pub fn create_api_state(handle: SchedulerHandle) -> ApiState {
    ApiState { handle }
}

/// Start the API server.
///
/// This function spawns the server and returns a handle to the task.
/// The server runs until the task is aborted or the process exits.
pub async fn start_server(
    config: ApiConfig,
    state: ApiState,
) -> io::Result<tokio::task::JoinHandle<()>> {
    let router = build_router(state);
    let addr = config.socket_addr()?;

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("API server listening on http://{}", listener.local_addr()?);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(handle)
}
