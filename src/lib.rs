//! HomeGuard - a durable, retryable background task engine.
//!
//! Callers submit `adapter.method` invocations; each becomes a persisted
//! task that a scheduler loop claims, executes on a bounded worker pool and
//! retries with backoff until it succeeds or is given up.

pub mod adapters;
pub mod api;
pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod registry;
pub mod scheduler;
pub mod storage;
pub mod testing;

pub use config::{ConfigError, EngineConfig, YamlLoader};
pub use core::handler::{ErrorKind, FnHandler, Handler, HandlerError, handler_fn};
pub use core::retry::{Backoff, RetryCondition, RetryDecision, RetryPolicy};
pub use core::task::{NewTask, Task, Transition};
pub use core::types::{TaskId, TaskStatus};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{AttemptOutcome, ClaimedTask, ExecutionWorker, TimeoutPolicy};
pub use registry::{AdapterBuilder, DispatchRegistry, ResolutionError};
pub use scheduler::{Scheduler, SchedulerError, SchedulerHandle, SchedulerSettings, SchedulerState};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStore;
pub use storage::{InMemoryStore, StorageError, TaskQuery, TaskStore};
