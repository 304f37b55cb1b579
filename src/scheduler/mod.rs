//! Scheduler loop for task execution.
//!
//! This module polls the store for due tasks, runs their attempts on a
//! bounded worker pool and recovers attempts interrupted by a restart.

mod engine;
mod handle;
mod types;

pub use engine::Scheduler;
pub use handle::SchedulerHandle;
pub use types::{SchedulerError, SchedulerSettings, SchedulerState};
