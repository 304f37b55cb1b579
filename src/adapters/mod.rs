//! Built-in adapters.
//!
//! The `system` adapter has no hardware behind it. It makes a fresh
//! deployment usable and gives operators a way to probe the pipeline:
//!
//! - `system.ping` returns `"pong"`
//! - `system.echo` returns its params unchanged
//! - `system.sleep` waits `{"ms": n}` milliseconds, then returns `{"slept_ms": n}`

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

use crate::core::handler::{Handler, HandlerError};
use crate::registry::DispatchRegistry;

/// Name under which the built-in handlers are registered.
pub const SYSTEM_ADAPTER: &str = "system";

/// Register the `system` adapter.
pub fn register_system(registry: &mut DispatchRegistry) {
    registry
        .adapter(SYSTEM_ADAPTER)
        .method("ping", Ping)
        .method("echo", Echo)
        .method("sleep", Sleep);
}

struct Ping;

#[async_trait]
impl Handler for Ping {
    async fn call(&self, _params: Value) -> Result<Value, HandlerError> {
        Ok(json!("pong"))
    }
}

struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn call(&self, params: Value) -> Result<Value, HandlerError> {
        Ok(params)
    }
}

#[derive(Deserialize)]
struct SleepParams {
    ms: u64,
}

struct Sleep;

#[async_trait]
impl Handler for Sleep {
    async fn call(&self, params: Value) -> Result<Value, HandlerError> {
        let SleepParams { ms } = serde_json::from_value(params)?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "slept_ms": ms }))
    }
}
