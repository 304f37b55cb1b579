//! Core types: task records, status machine, handler capability and retry policy.

pub mod handler;
pub mod retry;
pub mod task;
pub mod types;
