//! One pass of probing over every known target.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;

use super::stats::{reduce, Reduction};
use super::{CycleFuture, Job};
use crate::db::{DbError, ProbeStore, Target};
use crate::probe::Prober;

/// Counts from one completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub targets: usize,
    pub probed: usize,
    pub failed: usize,
}

/// Tuning for how a cycle runs.
#[derive(Debug, Clone, Copy)]
pub struct CycleOptions {
    /// Probes in flight at once. 1 probes targets one after another.
    pub max_concurrent_probes: usize,
    /// Drop a firing while the previous cycle is still running.
    pub skip_overlapping: bool,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            max_concurrent_probes: 4,
            skip_overlapping: false,
        }
    }
}

/// One async lock per target id so updates to a target never interleave.
#[derive(Default)]
struct TargetLocks {
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl TargetLocks {
    fn get(&self, id: i64) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id).or_default().clone()
    }

    /// Forget locks for targets that no longer exist.
    fn retain(&self, ids: &HashSet<i64>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|id, _| ids.contains(id));
    }
}

/// Probes every target once and folds the results into the store.
pub struct ProbeCycle<S, P> {
    store: Arc<S>,
    prober: Arc<P>,
    options: CycleOptions,
    locks: TargetLocks,
    running: Arc<Semaphore>,
}

impl<S: ProbeStore, P: Prober> ProbeCycle<S, P> {
    pub fn new(store: Arc<S>, prober: Arc<P>, options: CycleOptions) -> Self {
        Self {
            store,
            prober,
            options,
            locks: TargetLocks::default(),
            running: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wrap this cycle as a job the scheduler can fire.
    pub fn job(self: &Arc<Self>) -> Job {
        let cycle = Arc::clone(self);
        Arc::new(move || -> CycleFuture { Box::pin(Arc::clone(&cycle).run()) })
    }

    /// Scheduled entry point: applies the overlap guard and logs the outcome.
    pub async fn run(self: Arc<Self>) {
        let _running = if self.options.skip_overlapping {
            match self.running.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!("Probe cycle: previous cycle still running, skipping this one");
                    return;
                }
            }
        } else {
            None
        };

        tracing::info!("Probe cycle: starting");
        match self.run_cycle().await {
            Ok(report) if report.targets == 0 => {
                tracing::info!("Probe cycle: no targets to probe");
            }
            Ok(report) => {
                tracing::info!(
                    "Probe cycle: finished, {} probed, {} failed",
                    report.probed,
                    report.failed
                );
            }
            Err(e) => {
                tracing::error!("Probe cycle: failed to get targets: {}", e);
            }
        }
    }

    /// Probe every target once. Only a failure to list targets aborts the
    /// cycle; a failure on one target is logged and counted.
    pub async fn run_cycle(self: &Arc<Self>) -> Result<CycleReport, DbError> {
        let targets = self.store.get_all_targets()?;

        let mut report = CycleReport {
            targets: targets.len(),
            ..Default::default()
        };
        if targets.is_empty() {
            return Ok(report);
        }

        self.locks.retain(&targets.iter().map(|t| t.id).collect());

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_probes.max(1)));
        let mut tasks = JoinSet::new();

        for target in targets {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let cycle = Arc::clone(self);
            tasks.spawn(async move {
                let _permit = permit;
                cycle.probe_target(target).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => report.probed += 1,
                Ok(Err(_)) => report.failed += 1,
                Err(e) => {
                    tracing::error!("Probe cycle: probe task failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn probe_target(&self, snapshot: Target) -> Result<(), DbError> {
        let result = self.prober.probe(&snapshot.url).await;
        let observed_at = Utc::now();

        let lock = self.locks.get(snapshot.id);
        let _guard = lock.lock().await;

        // Another cycle may have written this target since the snapshot.
        let prior = match self.store.get_target(snapshot.id) {
            Ok(t) => t,
            Err(DbError::NotFound) => {
                tracing::debug!("Probe cycle: {} was removed, dropping result", snapshot.url);
                return Ok(());
            }
            Err(e) => {
                tracing::error!("Probe cycle: failed to read {}: {}", snapshot.url, e);
                return Err(e);
            }
        };

        let reduction = reduce(&prior, &result, observed_at);
        if let Err(e) = self.persist(&reduction) {
            tracing::error!("Probe cycle: failed to update {}: {}", snapshot.url, e);
            return Err(e);
        }

        let update = &reduction.update;
        tracing::debug!(
            "Probe {} -> status {}, latency {}ms, {} samples totalling {}ms",
            snapshot.url,
            update.last_status(),
            update.latency_ms,
            update.total_probe_count,
            update.total_latency_sum
        );
        Ok(())
    }

    fn persist(&self, reduction: &Reduction) -> Result<(), DbError> {
        let update = &reduction.update;

        match update.status {
            Some(_) => {
                self.store.update_probe_stats(
                    update.target_id,
                    update.last_status(),
                    update.latency_ms,
                    update.first_up_time,
                    update.checked_at,
                )?;
                if let Some(entry) = &reduction.history {
                    self.store
                        .add_probe_history(entry.target_id, entry.latency_ms, entry.timestamp)?;
                }
            }
            None => {
                self.store.update_probe_network_error(
                    update.target_id,
                    update.latency_ms,
                    update.first_up_time,
                    update.checked_at,
                )?;
            }
        }

        Ok(())
    }
}
