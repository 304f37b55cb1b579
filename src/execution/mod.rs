//! Task execution engine.
//!
//! This module provides the worker that claims a due task, invokes its
//! handler once and records the outcome.

mod executor;

pub use executor::{AttemptOutcome, ClaimedTask, ExecutionWorker, TimeoutPolicy};
