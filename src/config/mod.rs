//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for the engine, with
//! environment variable overrides.

mod error;
mod types;
mod yaml;

pub use error::ConfigError;
pub use types::{
    ApiSection, BackoffStrategy, EngineConfig, EngineSection, LogFormat, LoggingConfig,
    RetryConfig, StorageBackend, StorageConfig,
};
pub use yaml::{ENV_PREFIX, YamlLoader};
