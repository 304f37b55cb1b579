//! Handler capability and error classification.
//!
//! A `Handler` is the only thing the engine knows about an adapter: it takes
//! a parameters payload and returns a result payload or a classified error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors a handler invocation can end with.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The parameters payload is malformed for this operation.
    #[error("invalid parameters: {0}")]
    Validation(String),

    /// A condition that may clear up on its own (device busy, I/O hiccup).
    #[error("transient error: {0}")]
    Transient(String),

    /// The handler did not finish within the execution timeout.
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),

    /// The handler reports a condition no retry can fix.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Any other error; classified as `ErrorKind::Unknown`.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Shorthand for a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        HandlerError::Transient(message.into())
    }

    /// Shorthand for a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        HandlerError::Validation(message.into())
    }

    /// Shorthand for a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        HandlerError::Fatal(message.into())
    }

    /// Classification used by the retry policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::Validation(_) => ErrorKind::Validation,
            HandlerError::Transient(_) => ErrorKind::Transient,
            HandlerError::Timeout(_) => ErrorKind::Timeout,
            HandlerError::Fatal(_) => ErrorKind::Fatal,
            HandlerError::Other(_) => ErrorKind::Unknown,
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::Validation(err.to_string())
    }
}

/// Kind of failure an attempt ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No handler is registered for the adapter/method pair.
    Resolution,
    /// Malformed parameters.
    Validation,
    /// Busy resource or transient I/O.
    Transient,
    /// Execution timeout elapsed.
    Timeout,
    /// Handler declared the failure unrecoverable.
    Fatal,
    /// Unclassified error.
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Resolution => "resolution",
            ErrorKind::Validation => "validation",
            ErrorKind::Transient => "transient",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// An invokable operation exposed by an adapter.
///
/// # Example
///
/// ```ignore
/// use homeguard::{Handler, HandlerError};
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
///
/// struct TakePhoto;
///
/// #[async_trait]
/// impl Handler for TakePhoto {
///     async fn call(&self, params: Value) -> Result<Value, HandlerError> {
///         let quality = params.get("quality").and_then(Value::as_u64).unwrap_or(90);
///         Ok(json!({ "path": "/tmp/photo.jpg", "quality": quality }))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync {
    /// Run the operation with the task's parameters payload.
    async fn call(&self, params: Value) -> Result<Value, HandlerError>;
}

/// Handler backed by an async closure. Built with [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn call(&self, params: Value) -> Result<Value, HandlerError> {
        (self.f)(params).await
    }
}
