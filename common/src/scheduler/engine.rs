// Scheduler engine implementation: one in-process cron table for all entities

use super::dispatch::{DispatchOutcome, Dispatcher};
use crate::cycle::CycleExecutor;
use crate::errors::ScheduleError;
use crate::models::{EntityKey, WatchedEntity};
use crate::schedule::CronTrigger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Timezone cron expressions are evaluated in
    pub timezone: Tz,
    /// How long `stop` waits for in-flight cycles
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Scheduler trait for entity scheduling operations
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run the cron table until `stop` is called
    async fn start(&self) -> Result<(), ScheduleError>;

    /// Stop firing and wait (bounded) for in-flight cycles
    async fn stop(&self) -> Result<(), ScheduleError>;

    /// Dispatch every scheduled entity immediately and wait for all cycles.
    /// Returns the number of cycles dispatched.
    async fn run_all_once(&self) -> usize;
}

struct ScheduledEntity {
    entity: Arc<WatchedEntity>,
    trigger: CronTrigger,
}

/// Main scheduler engine implementation
pub struct SchedulerEngine {
    config: SchedulerConfig,
    entries: Vec<ScheduledEntity>,
    rejected: Vec<(EntityKey, ScheduleError)>,
    dispatcher: Dispatcher,
    shutdown_tx: watch::Sender<bool>,
    running: AtomicBool,
}

impl SchedulerEngine {
    /// Build the cron table. Entities with a malformed cron expression are
    /// logged and left out; the rest are scheduled normally.
    pub fn new(
        config: SchedulerConfig,
        entities: Vec<WatchedEntity>,
        executor: Arc<dyn CycleExecutor>,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let mut entries = Vec::with_capacity(entities.len());
        let mut rejected = Vec::new();

        for entity in entities {
            match CronTrigger::parse(entity.cron(), config.timezone) {
                Ok(trigger) => {
                    debug!(entity = %entity.key(), cron = %entity.cron(), "Entity scheduled");
                    entries.push(ScheduledEntity {
                        entity: Arc::new(entity),
                        trigger,
                    });
                }
                Err(e) => {
                    error!(
                        entity = %entity.key(),
                        cron = %entity.cron(),
                        error = %e,
                        "Invalid cron expression, entity will not be scheduled"
                    );
                    rejected.push((entity.key(), e));
                }
            }
        }

        info!(
            scheduled = entries.len(),
            rejected = rejected.len(),
            "Cron table built"
        );

        Self {
            config,
            entries,
            rejected,
            dispatcher: Dispatcher::new(executor),
            shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    pub fn scheduled_count(&self) -> usize {
        self.entries.len()
    }

    /// Entities left out of the cron table and why
    pub fn rejected(&self) -> &[(EntityKey, ScheduleError)] {
        &self.rejected
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Whether `stop` has been requested
    pub fn is_stopping(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Fire `entry` at each of its cron times until shutdown
    async fn run_entry(&self, entry: &ScheduledEntity, mut shutdown_rx: watch::Receiver<bool>) {
        let mut last_fire: Option<DateTime<Utc>> = None;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let now = Utc::now();
            // Never fire the same slot twice when the timer wakes slightly early
            let reference = last_fire.map_or(now, |last| last.max(now));
            let next = match entry.trigger.next_after(reference) {
                Ok(next) => next,
                Err(e) => {
                    error!(entity = %entry.entity.key(), error = %e, "No further fire times");
                    break;
                }
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    last_fire = Some(next);
                    if self.dispatcher.dispatch(entry.entity.clone()) == DispatchOutcome::Dispatched {
                        debug!(entity = %entry.entity.key(), "Cycle dispatched");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Scheduler for SchedulerEngine {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), ScheduleError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ScheduleError::AlreadyRunning);
        }

        info!(entities = self.entries.len(), "Starting scheduler engine");

        let loops = self
            .entries
            .iter()
            .map(|entry| self.run_entry(entry, self.shutdown_tx.subscribe()));
        futures::future::join_all(loops).await;

        if tokio::time::timeout(self.config.shutdown_grace, self.dispatcher.wait_idle())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.dispatcher.in_flight(),
                "Returning with cycles still in flight"
            );
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Scheduler engine stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), ScheduleError> {
        info!("Stopping scheduler engine");
        self.shutdown_tx.send_replace(true);

        let in_flight = self.dispatcher.in_flight();
        if in_flight > 0 {
            info!(in_flight, "Waiting for in-flight cycles");
        }

        if tokio::time::timeout(self.config.shutdown_grace, self.dispatcher.wait_idle())
            .await
            .is_err()
        {
            warn!(
                grace_seconds = self.config.shutdown_grace.as_secs(),
                "In-flight cycles did not finish within the shutdown grace period"
            );
        }

        info!("Scheduler engine stopped gracefully");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn run_all_once(&self) -> usize {
        let mut dispatched = 0;
        for entry in &self.entries {
            if self.dispatcher.dispatch(entry.entity.clone()) == DispatchOutcome::Dispatched {
                dispatched += 1;
            }
        }

        self.dispatcher.wait_idle().await;
        info!(dispatched, "Run-once pass finished");
        dispatched
    }
}
