//! Dispatch registry mapping `(adapter, method)` pairs to handlers.
//!
//! The registry is filled through `&mut self` at startup and then shared
//! behind an `Arc`; lookups only need `&self` and take no locks.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::core::handler::Handler;

/// Returned when no handler is registered for a pair.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// No method of this adapter is registered.
    #[error("unknown adapter: {adapter}")]
    UnknownAdapter { adapter: String },

    /// The adapter exists but does not expose this method.
    #[error("unknown method: {adapter}.{method}")]
    UnknownMethod { adapter: String, method: String },

    /// A method path could not be split into `adapter.method`.
    #[error("malformed method path: {0:?}")]
    MalformedPath(String),
}

/// Split an `adapter.method` path at its first dot.
pub fn parse_method_path(path: &str) -> Result<(&str, &str), ResolutionError> {
    match path.split_once('.') {
        Some((adapter, method)) if !adapter.is_empty() && !method.is_empty() => {
            Ok((adapter, method))
        }
        _ => Err(ResolutionError::MalformedPath(path.to_string())),
    }
}

/// Handlers keyed by adapter, then method.
#[derive(Default)]
pub struct DispatchRegistry {
    adapters: HashMap<String, HashMap<String, Arc<dyn Handler>>>,
}

impl DispatchRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. A later registration of the same pair replaces
    /// the earlier one.
    pub fn register<H>(
        &mut self,
        adapter: impl Into<String>,
        method: impl Into<String>,
        handler: H,
    ) -> &mut Self
    where
        H: Handler + 'static,
    {
        self.register_arc(adapter, method, Arc::new(handler))
    }

    /// Register an already shared handler.
    pub fn register_arc(
        &mut self,
        adapter: impl Into<String>,
        method: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> &mut Self {
        let adapter = adapter.into();
        let method = method.into();
        let methods = self.adapters.entry(adapter.clone()).or_default();
        if methods.insert(method.clone(), handler).is_some() {
            debug!(adapter = %adapter, method = %method, "replaced handler registration");
        }
        self
    }

    /// Start registering methods of one adapter.
    pub fn adapter(&mut self, name: impl Into<String>) -> AdapterBuilder<'_> {
        AdapterBuilder {
            registry: self,
            name: name.into(),
        }
    }

    /// Look up the handler for a pair.
    pub fn resolve(
        &self,
        adapter: &str,
        method: &str,
    ) -> Result<Arc<dyn Handler>, ResolutionError> {
        let methods = self
            .adapters
            .get(adapter)
            .ok_or_else(|| ResolutionError::UnknownAdapter {
                adapter: adapter.to_string(),
            })?;

        methods
            .get(method)
            .cloned()
            .ok_or_else(|| ResolutionError::UnknownMethod {
                adapter: adapter.to_string(),
                method: method.to_string(),
            })
    }

    /// Whether a handler is registered for the pair.
    pub fn contains(&self, adapter: &str, method: &str) -> bool {
        self.resolve(adapter, method).is_ok()
    }

    /// Registered adapter names, sorted.
    pub fn adapters(&self) -> Vec<String> {
        let names: BTreeSet<_> = self.adapters.keys().cloned().collect();
        names.into_iter().collect()
    }

    /// Registered methods of one adapter, sorted. Empty for an unknown adapter.
    pub fn methods(&self, adapter: &str) -> Vec<String> {
        let names: BTreeSet<_> = self
            .adapters
            .get(adapter)
            .map(|methods| methods.keys().cloned().collect())
            .unwrap_or_default();
        names.into_iter().collect()
    }

    /// Total number of registered pairs.
    pub fn len(&self) -> usize {
        self.adapters.values().map(HashMap::len).sum()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for DispatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries: Vec<_> = self
            .adapters()
            .into_iter()
            .map(|adapter| {
                let methods = self.methods(&adapter);
                (adapter, methods)
            })
            .collect();
        f.debug_struct("DispatchRegistry")
            .field("adapters", &entries)
            .finish()
    }
}

/// Registers several methods under one adapter name.
///
/// # Example
///
/// ```ignore
/// let mut registry = DispatchRegistry::new();
/// registry
///     .adapter("camera")
///     .method("takePhoto", TakePhoto)
///     .method("recordVideo", RecordVideo);
/// ```
pub struct AdapterBuilder<'a> {
    registry: &'a mut DispatchRegistry,
    name: String,
}

impl AdapterBuilder<'_> {
    /// Register one method of the adapter.
    pub fn method<H>(self, method: impl Into<String>, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        self.registry.register(self.name.clone(), method, handler);
        self
    }
}
