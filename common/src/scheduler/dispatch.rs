// Cycle dispatch: per-entity serialization and in-flight task tracking

use crate::cycle::CycleExecutor;
use crate::models::{EntityKey, WatchedEntity};
use crate::telemetry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched,
    /// The entity's previous cycle was still running
    SkippedBusy,
}

/// One async mutex per entity identity
#[derive(Default)]
pub struct EntityGuards {
    locks: Mutex<HashMap<EntityKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl EntityGuards {
    /// Claim the entity without waiting; `None` while another cycle holds it
    pub fn try_acquire(&self, key: &EntityKey) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };
        lock.try_lock_owned().ok()
    }
}

/// Handles of dispatched cycles, so callers can wait for outstanding work
#[derive(Default)]
pub struct CycleTracker {
    handles: Mutex<Vec<JoinHandle<()>>>,
    active: Arc<AtomicUsize>,
}

/// Counts a cycle as active until its task ends, by completion, panic or abort
struct ActiveCycle(Arc<AtomicUsize>);

impl Drop for ActiveCycle {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CycleTracker {
    pub fn spawn<F>(&self, cycle: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.active.fetch_add(1, Ordering::SeqCst);
        let active = ActiveCycle(self.active.clone());
        let handle = tokio::spawn(async move {
            let _active = active;
            cycle.await;
        });

        let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Number of cycles that have not finished yet
    pub fn in_flight(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Wait until every tracked cycle, including ones dispatched while
    /// waiting, has finished
    pub async fn wait_idle(&self) {
        loop {
            let pending = {
                let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
                std::mem::take(&mut *handles)
            };
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        error!(error = %e, "Cycle task panicked");
                    }
                }
            }
        }
    }
}

/// Spawns cycles on the runtime without blocking the caller
#[derive(Clone)]
pub struct Dispatcher {
    executor: Arc<dyn CycleExecutor>,
    guards: Arc<EntityGuards>,
    tracker: Arc<CycleTracker>,
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn CycleExecutor>) -> Self {
        Self {
            executor,
            guards: Arc::new(EntityGuards::default()),
            tracker: Arc::new(CycleTracker::default()),
        }
    }

    pub fn dispatch(&self, entity: Arc<WatchedEntity>) -> DispatchOutcome {
        let key = entity.key();
        let kind = entity.kind();

        let Some(guard) = self.guards.try_acquire(&key) else {
            warn!(entity = %key, kind = %kind, "Previous cycle still running, skipping this fire");
            telemetry::record_cycle(kind.as_str(), "skipped_busy");
            return DispatchOutcome::SkippedBusy;
        };

        let executor = self.executor.clone();
        self.tracker.spawn(async move {
            let _guard = guard;
            execute_cycle(executor.as_ref(), &entity).await;
        });

        DispatchOutcome::Dispatched
    }

    pub async fn wait_idle(&self) {
        self.tracker.wait_idle().await
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.in_flight()
    }
}

/// Run one cycle and report its result; errors stop here
async fn execute_cycle(executor: &dyn CycleExecutor, entity: &WatchedEntity) {
    let key = entity.key();
    let kind = entity.kind();
    let started = Instant::now();

    match executor.run_cycle(entity).await {
        Ok(outcome) => {
            info!(entity = %key, kind = %kind, outcome = outcome.label(), "Cycle finished");
            telemetry::record_cycle(kind.as_str(), outcome.label());
        }
        Err(e) => {
            error!(entity = %key, kind = %kind, reason = e.reason(), error = %e, "Cycle failed");
            telemetry::record_cycle(kind.as_str(), "failed");
        }
    }

    telemetry::record_cycle_duration(kind.as_str(), started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_guard_is_exclusive_until_dropped() {
        let guards = EntityGuards::default();
        let key = EntityKey::ImageFlow {
            flow: "edge".to_string(),
        };
        let other = EntityKey::ImageFlow {
            flow: "core".to_string(),
        };

        let held = guards.try_acquire(&key).unwrap();
        assert!(guards.try_acquire(&key).is_none());
        assert!(guards.try_acquire(&other).is_some());

        drop(held);
        assert!(guards.try_acquire(&key).is_some());
    }

    #[tokio::test]
    async fn test_tracker_waits_for_all_handles() {
        let tracker = CycleTracker::default();
        let done = Arc::new(AtomicUsize::new(0));
        for delay in [10u64, 30, 50] {
            let done = done.clone();
            tracker.spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(tracker.in_flight(), 3);

        tracker.wait_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_in_flight_counts_cycles_being_waited_on() {
        let tracker = Arc::new(CycleTracker::default());
        tracker.spawn(async {
            tokio::time::sleep(Duration::from_millis(300)).await;
        });

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tracker.in_flight(), 1);

        waiter.await.unwrap();
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panicking_cycle_is_no_longer_in_flight() {
        let tracker = CycleTracker::default();
        tracker.spawn(async {
            panic!("cycle blew up");
        });

        tracker.wait_idle().await;
        assert_eq!(tracker.in_flight(), 0);
    }
}
