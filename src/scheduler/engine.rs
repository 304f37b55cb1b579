//! Scheduler engine implementation.
//!
//! The scheduler is responsible for:
//! - Polling the store for due tasks on a fixed tick, and on every submit
//! - Claiming them and running each attempt on a bounded worker pool
//! - Pause and resume functionality
//! - Recovery of attempts interrupted by a previous process exit
//! - Graceful shutdown

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::retry::RetryPolicy;
use crate::core::types::TaskId;
use crate::events::EventBus;
use crate::execution::{AttemptOutcome, ExecutionWorker};
use crate::registry::DispatchRegistry;
use crate::storage::TaskStore;

use super::handle::{COMMAND_CHANNEL_BUFFER, SchedulerHandle};
use super::types::{SchedulerCommand, SchedulerError, SchedulerSettings, SchedulerState};

/// Number of stale tasks fetched per recovery query.
const RECOVERY_BATCH: usize = 1000;

/// Main scheduler for task execution.
pub struct Scheduler<S: TaskStore> {
    /// Storage backend.
    store: Arc<S>,
    /// Handlers by adapter and method.
    registry: Arc<DispatchRegistry>,
    /// Event bus for emitting events.
    event_bus: Arc<EventBus>,
    /// Retry policy applied to failed attempts.
    policy: RetryPolicy,
    settings: SchedulerSettings,
    /// One permit per worker slot.
    slots: Arc<Semaphore>,
    /// Fired by the handle on submit.
    wake: Arc<Notify>,
    /// Attempts in flight.
    running: RwLock<HashMap<TaskId, JoinHandle<()>>>,
}

impl<S: TaskStore + 'static> Scheduler<S> {
    /// Create a new scheduler with the given storage and registry.
    pub fn new(store: S, registry: DispatchRegistry) -> Self {
        Self::with_storage(Arc::new(store), Arc::new(registry))
    }

    /// Create a new scheduler with shared storage and registry.
    pub fn with_storage(store: Arc<S>, registry: Arc<DispatchRegistry>) -> Self {
        let settings = SchedulerSettings::default();
        Self {
            store,
            registry,
            event_bus: Arc::new(EventBus::new()),
            policy: RetryPolicy::default(),
            slots: Arc::new(Semaphore::new(settings.max_workers)),
            settings,
            wake: Arc::new(Notify::new()),
            running: RwLock::new(HashMap::new()),
        }
    }

    /// Replace all settings at once.
    pub fn with_settings(mut self, settings: SchedulerSettings) -> Self {
        self.slots = Arc::new(Semaphore::new(settings.max_workers));
        self.settings = settings;
        self
    }

    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Set the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.settings.poll_interval = interval;
        self
    }

    /// Set the size of the worker pool.
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.settings.max_workers = max;
        self.slots = Arc::new(Semaphore::new(max));
        self
    }

    /// Set the per-attempt execution timeout.
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.settings.execution_timeout = timeout;
        self
    }

    /// Set the graceful shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.settings.shutdown_timeout = timeout;
        self
    }

    /// Set the age after which a `RUNNING` task counts as interrupted.
    pub fn with_recovery_grace(mut self, grace: Duration) -> Self {
        self.settings.recovery_grace = grace;
        self
    }

    /// Get the settings in use.
    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Get the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Number of attempts currently in flight.
    pub async fn in_flight(&self) -> usize {
        self.cleanup_finished().await;
        self.running.read().await.len()
    }

    /// Set how often a running scheduler looks for interrupted attempts.
    pub fn with_recovery_interval(mut self, interval: Duration) -> Self {
        self.settings.recovery_interval = interval;
        self
    }

    /// Start the scheduler and return a handle for controlling it.
    ///
    /// Interrupted attempts are recovered before the first poll. A failed
    /// recovery pass is retried on every tick until one completes.
    pub async fn start(self) -> (SchedulerHandle, JoinHandle<()>) {
        let recovery_pending = !self.recover_logged().await;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(SchedulerState::Running));

        let store: Arc<dyn TaskStore> = self.store.clone();
        let handle = SchedulerHandle {
            command_tx,
            state: Arc::clone(&state),
            store,
            registry: Arc::clone(&self.registry),
            wake: Arc::clone(&self.wake),
            event_bus: Arc::clone(&self.event_bus),
        };

        let scheduler_task = tokio::spawn(async move {
            self.run(command_rx, state, recovery_pending).await;
        });

        (handle, scheduler_task)
    }

    /// Run one polling pass: fetch due tasks up to the free worker slots,
    /// claim each in order and start its attempt.
    ///
    /// Returns the number of attempts started. Tasks whose claim was lost to
    /// another worker are skipped.
    pub async fn poll_once(&self) -> Result<usize, SchedulerError> {
        self.cleanup_finished().await;

        let free = self.slots.available_permits();
        if free == 0 {
            debug!("all workers busy, skipping poll");
            return Ok(0);
        }

        let limit = free.min(self.settings.max_batch);
        let due = self.store.fetch_due(Utc::now(), limit).await?;
        if due.is_empty() {
            return Ok(0);
        }

        debug!(count = due.len(), "found due tasks");
        let worker = Arc::new(self.worker());
        let mut started = 0;

        for task in due {
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                break;
            };

            let id = task.id;
            let claimed = match worker.claim(task).await {
                Ok(Some(claimed)) => claimed,
                Ok(None) => continue,
                Err(e) => {
                    warn!(task_id = %id, error = %e, "claim failed, ending poll");
                    break;
                }
            };

            let worker = Arc::clone(&worker);
            let handle = tokio::spawn(async move {
                let _permit = permit;
                worker.execute(claimed).await;
            });
            self.running.write().await.insert(id, handle);
            started += 1;
        }

        Ok(started)
    }

    /// Settle tasks left `RUNNING` by a crashed process.
    ///
    /// Only tasks whose attempt started longer ago than the recovery grace
    /// period are touched, and never one this scheduler is still running.
    /// Each one is treated as a transient failed attempt and goes through the
    /// retry policy. Stale tasks are fetched in batches until none are left.
    pub async fn recover(&self) -> Result<Vec<TaskId>, SchedulerError> {
        let cutoff = recovery_cutoff(Utc::now(), self.settings.recovery_grace);
        let worker = self.worker();
        let mut recovered = Vec::new();

        loop {
            let stale = self
                .store
                .list_running_started_before(cutoff, RECOVERY_BATCH)
                .await?;
            let last_batch = stale.len() < RECOVERY_BATCH;

            let mut settled = 0;
            for task in stale {
                if self.running.read().await.contains_key(&task.id) {
                    continue;
                }
                match worker.recover_interrupted(&task).await {
                    AttemptOutcome::Superseded | AttemptOutcome::StoreFailed(_) => {}
                    outcome => {
                        info!(task_id = %task.id, ?outcome, "recovered interrupted task");
                        recovered.push(task.id);
                        settled += 1;
                    }
                }
            }

            if last_batch || settled == 0 {
                break;
            }
        }

        Ok(recovered)
    }

    /// Run a recovery pass and log how it went. Returns whether it completed.
    async fn recover_logged(&self) -> bool {
        match self.recover().await {
            Ok(recovered) => {
                if !recovered.is_empty() {
                    info!(count = recovered.len(), "recovered interrupted tasks");
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "recovery of interrupted tasks failed, will retry");
                false
            }
        }
    }

    fn worker(&self) -> ExecutionWorker<S> {
        ExecutionWorker::new(Arc::clone(&self.store), Arc::clone(&self.registry))
            .with_retry_policy(self.policy.clone())
            .with_execution_timeout(self.settings.execution_timeout)
            .with_timeout_policy(self.settings.timeout_policy)
            .with_store_retry_interval(self.settings.store_retry_interval)
            .with_event_bus(Arc::clone(&self.event_bus))
    }

    /// Main scheduler loop.
    async fn run(
        self,
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
        state: Arc<RwLock<SchedulerState>>,
        mut recovery_pending: bool,
    ) {
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let recovery_period = self.settings.recovery_interval;
        let mut recovery =
            tokio::time::interval_at(Instant::now() + recovery_period, recovery_period);
        recovery.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let wake = Arc::clone(&self.wake);

        info!(
            poll_interval = ?self.settings.poll_interval,
            max_workers = self.settings.max_workers,
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if recovery_pending {
                        recovery_pending = !self.recover_logged().await;
                    }
                    self.tick(&state).await;
                }

                _ = recovery.tick() => {
                    recovery_pending = !self.recover_logged().await;
                }

                _ = wake.notified() => {
                    self.tick(&state).await;
                }

                command = command_rx.recv() => {
                    match command {
                        Some(SchedulerCommand::Pause { response }) => {
                            *state.write().await = SchedulerState::Paused;
                            info!("scheduler paused");
                            let _ = response.send(());
                        }
                        Some(SchedulerCommand::Resume { response }) => {
                            *state.write().await = SchedulerState::Running;
                            info!("scheduler resumed");
                            self.wake.notify_one();
                            let _ = response.send(());
                        }
                        Some(SchedulerCommand::Shutdown { response }) => {
                            *state.write().await = SchedulerState::Stopped;
                            self.await_running().await;
                            let _ = response.send(());
                            break;
                        }
                        None => {
                            info!("all scheduler handles dropped, stopping");
                            *state.write().await = SchedulerState::Stopped;
                            self.await_running().await;
                            break;
                        }
                    }
                }
            }
        }

        info!("scheduler stopped");
    }

    async fn tick(&self, state: &RwLock<SchedulerState>) {
        if *state.read().await != SchedulerState::Running {
            self.cleanup_finished().await;
            return;
        }
        if let Err(e) = self.poll_once().await {
            warn!(error = %e, "poll failed");
        }
    }

    /// Clean up finished attempt handles.
    async fn cleanup_finished(&self) {
        let mut running = self.running.write().await;
        running.retain(|_, handle| !handle.is_finished());
    }

    /// Wait for all in-flight attempts to complete with a timeout.
    async fn await_running(&self) {
        self.cleanup_finished().await;
        let running_count = self.running.read().await.len();

        if running_count == 0 {
            info!("no running tasks to wait for during shutdown");
            return;
        }

        info!(
            running = running_count,
            timeout = ?self.settings.shutdown_timeout,
            "graceful shutdown: waiting for running tasks"
        );

        let start = Instant::now();
        let deadline = start + self.settings.shutdown_timeout;

        loop {
            self.cleanup_finished().await;
            let remaining = self.running.read().await.len();

            if remaining == 0 {
                info!(elapsed = ?start.elapsed(), "all running tasks completed");
                break;
            }

            if Instant::now() >= deadline {
                warn!(
                    remaining,
                    timeout = ?self.settings.shutdown_timeout,
                    "graceful shutdown timeout exceeded, abandoning attempts to recovery"
                );
                let abandoned: Vec<_> = self.running.write().await.drain().collect();
                for (_, handle) in abandoned {
                    handle.abort();
                    let _ = handle.await;
                }
                break;
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

fn recovery_cutoff(now: DateTime<Utc>, grace: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(grace)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
