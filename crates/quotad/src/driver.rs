//! PoolDriver — runs one pool's scheduler on a clock.
//!
//! Each tick advances the scheduler to `now`, runs one pass, and writes
//! the post-pass snapshot. The scheduler sits behind a `tokio::sync::Mutex`
//! so reconciler updates and passes never interleave within a pool.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use quota_core::{PoolSpec, Timestamp};
use quota_scheduler::Scheduler;
use quota_state::{Mutation, SnapshotStore};
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct PoolDriver {
    pool_id: String,
    scheduler: Arc<Mutex<Scheduler>>,
    store: Option<SnapshotStore>,
}

impl PoolDriver {
    pub fn new(pool_id: impl Into<String>, scheduler: Scheduler, store: Option<SnapshotStore>) -> Self {
        Self {
            pool_id: pool_id.into(),
            scheduler: Arc::new(Mutex::new(scheduler)),
            store,
        }
    }

    /// Resume `spec.id` from its stored snapshot, or build it fresh from
    /// the config (clock at `now`) when nothing is stored.
    pub fn restore_or_build(
        spec: &PoolSpec,
        store: Option<SnapshotStore>,
        now: Timestamp,
    ) -> anyhow::Result<Self> {
        let stored = match &store {
            Some(store) => store.get_snapshot(&spec.id)?,
            None => None,
        };
        let scheduler = match stored {
            Some(snapshot) => {
                info!(
                    pool = %spec.id,
                    last_update = snapshot.state.last_update_time,
                    "pool restored from snapshot"
                );
                Scheduler::from_snapshot(snapshot)
            }
            None => Scheduler::from_pool(spec, now)?,
        };
        Ok(Self::new(spec.id.clone(), scheduler, store))
    }

    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    /// Shared handle for feeding fleet notifications between ticks.
    pub fn scheduler(&self) -> Arc<Mutex<Scheduler>> {
        Arc::clone(&self.scheduler)
    }

    /// Advance to `now`, run one pass, and persist the result.
    pub async fn tick(&self, now: Timestamp) -> anyhow::Result<Vec<Mutation>> {
        let mut scheduler = self.scheduler.lock().await;
        scheduler.update_time(now)?;
        let mutations = scheduler.run_once();

        if let Some(store) = &self.store {
            store.put_snapshot(&scheduler.to_snapshot(&self.pool_id))?;
        }

        for mutation in mutations.iter().filter(|m| m.requires_dispatch()) {
            debug!(pool = %self.pool_id, ?mutation, "dispatch required");
        }
        if !mutations.is_empty() {
            info!(
                pool = %self.pool_id,
                mutations = mutations.len(),
                pending = scheduler.state().requests.len(),
                "scheduling pass applied"
            );
        }
        Ok(mutations)
    }

    /// Tick every `interval` on the wall clock until `shutdown` fires.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            pool = %self.pool_id,
            interval_ms = interval.as_millis() as u64,
            "pool driver started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.tick(epoch_millis()).await {
                        error!(pool = %self.pool_id, error = %e, "scheduling pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!(pool = %self.pool_id, "pool driver shutting down");
                    break;
                }
            }
        }
    }
}

pub fn epoch_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}
