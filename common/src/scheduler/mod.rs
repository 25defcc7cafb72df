// Scheduler module: cron table, per-entity dispatch and shutdown

pub mod dispatch;
pub mod engine;

pub use dispatch::{CycleTracker, DispatchOutcome, Dispatcher, EntityGuards};
pub use engine::{Scheduler, SchedulerConfig, SchedulerEngine};
