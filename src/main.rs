//! homeguard - durable background task engine for home hardware actions.
//!
//! Usage:
//!   homeguard serve [--config <file>]     Recover, then run the scheduler and HTTP API
//!   homeguard validate --config <file>    Validate a configuration file without running
//!   homeguard adapters                    List the built-in adapters and their methods

use clap::{Parser, Subcommand};
use homeguard::adapters::register_system;
use homeguard::api::{ApiConfig, create_api_state, start_server};
use homeguard::config::{LogFormat, LoggingConfig, StorageBackend};
use homeguard::{
    DispatchRegistry, EngineConfig, Event, EventBus, EventHandler, InMemoryStore, Scheduler,
    TaskStore, YamlLoader,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// homeguard - durable, retryable background tasks for hardware adapters
#[derive(Parser)]
#[command(name = "homeguard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and the HTTP API
    Serve {
        /// Path to the YAML configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Do not start the HTTP API
        #[arg(long)]
        no_api: bool,
    },

    /// Validate a configuration file without running
    Validate {
        /// Path to the YAML configuration file
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// List the built-in adapters and their methods
    Adapters,
}

/// Logging event handler that reports task lifecycle events.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::TaskSubmitted {
                task_id,
                adapter,
                method,
                ..
            } => {
                info!("Task {} submitted: {}.{}", task_id, adapter, method);
            }
            Event::TaskClaimed {
                task_id, attempt, ..
            } => {
                info!("Task {} started (attempt {})", task_id, attempt);
            }
            Event::TaskSucceeded {
                task_id, duration, ..
            } => {
                info!("Task {} succeeded in {:?}", task_id, duration);
            }
            Event::TaskRetryScheduled {
                task_id,
                retry_count,
                error,
                next_retry_at,
                ..
            } => {
                warn!(
                    "Task {} failed (attempt {}): {}; retrying at {}",
                    task_id, retry_count, error, next_retry_at
                );
            }
            Event::TaskFailed {
                task_id,
                error,
                kind,
                retry_count,
                ..
            } => {
                error!(
                    "Task {} failed for good after {} attempt(s) [{}]: {}",
                    task_id, retry_count, kind, error
                );
            }
            Event::TaskRecovered { task_id, .. } => {
                warn!("Task {} was interrupted by a restart and has been recovered", task_id);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, no_api } => {
            let config = YamlLoader::load(config.as_deref())?;
            init_tracing(&config.logging);
            serve(config, !no_api).await?;
        }
        Commands::Validate { config } => {
            init_tracing(&LoggingConfig::default());
            validate_config(config)?;
        }
        Commands::Adapters => {
            list_adapters();
        }
    }

    Ok(())
}

/// Initialize logging. `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn registry() -> DispatchRegistry {
    let mut registry = DispatchRegistry::new();
    register_system(&mut registry);
    registry
}

/// Open the configured store and run the engine on it.
async fn serve(config: EngineConfig, with_api: bool) -> Result<(), Box<dyn std::error::Error>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; tasks will not survive a restart");
            run_engine(InMemoryStore::new(), config, with_api).await
        }
        #[cfg(feature = "sqlite")]
        StorageBackend::Sqlite => {
            info!("Opening task store at {}", config.storage.path);
            let store = homeguard::SqliteStore::with_pool_size(
                &config.storage.path,
                config.storage.max_connections,
            )
            .await?;
            run_engine(store, config, with_api).await
        }
        #[cfg(not(feature = "sqlite"))]
        StorageBackend::Sqlite => {
            Err("sqlite backend not compiled in; set storage.backend to memory".into())
        }
    }
}

async fn run_engine<S: TaskStore + 'static>(
    store: S,
    config: EngineConfig,
    with_api: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = registry();
    info!("Registered adapters: {}", registry.adapters().join(", "));

    // Create event bus with logging handler
    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;

    let scheduler = Scheduler::new(store, registry)
        .with_settings(config.scheduler_settings())
        .with_retry_policy(config.retry_policy())
        .with_event_bus(event_bus);

    info!(
        "Starting scheduler (poll interval: {}ms, workers: {})...",
        config.engine.poll_interval_ms, config.engine.max_workers
    );
    let (handle, scheduler_task) = scheduler.start().await;

    let server = if with_api && config.api.enabled {
        let state = create_api_state(handle.clone());
        Some(start_server(ApiConfig::from(&config.api), state).await?)
    } else {
        None
    };

    info!("Press Ctrl+C to stop");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            handle.shutdown().await?;
        }
        _ = scheduler_task => {
            info!("Scheduler stopped");
        }
    }

    if let Some(server) = server {
        server.abort();
    }

    info!("Goodbye!");
    Ok(())
}

/// Validate a configuration file without running.
fn validate_config(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating configuration: {}", path.display());

    match YamlLoader::load_config(&path) {
        Ok(config) => {
            info!("Configuration is valid:");
            info!(
                "  engine: poll {}ms, {} worker(s), batch {}, timeout {}s",
                config.engine.poll_interval_ms,
                config.engine.max_workers,
                config.engine.max_batch,
                config.engine.execution_timeout_secs
            );
            info!(
                "  retry: {} attempt(s), {:?} backoff from {}s up to {}s",
                config.retry.max_attempts,
                config.retry.strategy,
                config.retry.base_secs,
                config.retry.max_secs
            );
            info!("  storage: {:?} {}", config.storage.backend, config.storage.path);
            if config.api.enabled {
                info!("  api: http://{}:{}", config.api.host, config.api.port);
            } else {
                info!("  api: disabled");
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// List the built-in adapters.
fn list_adapters() {
    let registry = registry();

    println!("Built-in adapters:");
    println!();

    for adapter in registry.adapters() {
        println!("{}", adapter);
        for method in registry.methods(&adapter) {
            println!("  - {}.{}", adapter, method);
        }
    }
}
