//! Scheduler module for running probe cycles on a recurring trigger.
//!
//! The [`Scheduler`] owns exactly one trigger at a time. Each firing spawns
//! the job on its own task, so a cycle that outlasts the interval can
//! overlap the next one unless the cycle itself is configured to skip.

mod cycle;
mod interval;
mod stats;

pub use cycle::*;
pub use interval::*;
pub use stats::*;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};

/// Future produced by one firing of a [`Job`].
pub type CycleFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Work run on every firing.
pub type Job = Arc<dyn Fn() -> CycleFuture + Send + Sync>;

/// Scheduler error types.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid schedule interval: {0:?}")]
    InvalidInterval(String),
}

/// Identifies one trigger registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerId(u64);

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Trigger {
    id: TriggerId,
    interval: ScheduleInterval,
    stop: Option<oneshot::Sender<()>>,
}

impl Trigger {
    fn stop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
    }
}

/// Drives a job at one of the allow-listed cadences.
pub struct Scheduler {
    job: Job,
    active: Mutex<Trigger>,
    next_id: AtomicU64,
}

impl Scheduler {
    /// Validate `interval` and start firing `job` on it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(interval: &str, job: Job) -> Result<(Self, TriggerId), ScheduleError> {
        let interval: ScheduleInterval = interval.parse()?;
        let next_id = AtomicU64::new(1);
        let trigger = spawn_trigger(&next_id, interval, job.clone());
        let id = trigger.id;

        tracing::info!("Scheduler: running {} (trigger {})", interval, id);

        let scheduler = Self {
            job,
            active: Mutex::new(trigger),
            next_id,
        };
        Ok((scheduler, id))
    }

    /// Replace the active trigger with one at the new cadence.
    ///
    /// An invalid interval is rejected and the current trigger keeps running.
    /// A cycle already in flight is left to finish.
    pub fn reconfigure(&self, interval: &str) -> Result<TriggerId, ScheduleError> {
        let interval: ScheduleInterval = match interval.parse() {
            Ok(i) => i,
            Err(e) => {
                tracing::warn!("Scheduler: rejected reconfiguration: {}", e);
                return Err(e);
            }
        };

        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let old_id = active.id;
        active.stop();
        *active = spawn_trigger(&self.next_id, interval, self.job.clone());

        tracing::info!(
            "Scheduler: replaced trigger {} with {} ({})",
            old_id,
            active.id,
            interval
        );
        Ok(active.id)
    }

    pub fn active_trigger(&self) -> TriggerId {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).id
    }

    pub fn interval(&self) -> ScheduleInterval {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).interval
    }
}

fn spawn_trigger(next_id: &AtomicU64, interval: ScheduleInterval, job: Job) -> Trigger {
    let id = TriggerId(next_id.fetch_add(1, Ordering::Relaxed));
    let (stop_tx, stop_rx) = oneshot::channel();

    tokio::spawn(run_trigger(id, interval, job, stop_rx));

    Trigger {
        id,
        interval,
        stop: Some(stop_tx),
    }
}

/// Fire `job` every period until told to stop or the sender is dropped.
async fn run_trigger(
    id: TriggerId,
    interval: ScheduleInterval,
    job: Job,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let period = interval.period();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {
                tracing::debug!("Scheduler: trigger {} fired", id);
                tokio::spawn(job());
            }
        }
    }

    tracing::debug!("Scheduler: trigger {} stopped", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Debug, PartialEq)]
    enum Event {
        Started(Instant),
        Finished(Instant),
    }

    /// A job that reports when it starts and finishes, taking `work` to run.
    fn recording_job(work: Duration) -> (Job, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let job: Job = Arc::new(move || -> CycleFuture {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(Event::Started(Instant::now()));
                if !work.is_zero() {
                    tokio::time::sleep(work).await;
                }
                let _ = tx.send(Event::Finished(Instant::now()));
            })
        });
        (job, rx)
    }

    async fn next_start(rx: &mut mpsc::UnboundedReceiver<Event>) -> Instant {
        loop {
            if let Event::Started(at) = rx.recv().await.unwrap() {
                return at;
            }
        }
    }

    fn assert_about(elapsed: Duration, expected: Duration) {
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_secs(1),
            "expected ~{:?}, got {:?}",
            expected,
            elapsed
        );
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_interval() {
        let (job, _rx) = recording_job(Duration::ZERO);
        let result = Scheduler::start("@every 7m", job);
        assert!(matches!(result, Err(ScheduleError::InvalidInterval(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_at_cadence() {
        let (job, mut rx) = recording_job(Duration::ZERO);
        let begin = Instant::now();
        let (scheduler, id) = Scheduler::start("@every 1m", job).unwrap();
        assert_eq!(scheduler.active_trigger(), id);
        assert_eq!(scheduler.interval(), ScheduleInterval::EveryMinute);

        let first = next_start(&mut rx).await;
        assert_about(first - begin, Duration::from_secs(60));

        let second = next_start(&mut rx).await;
        assert_about(second - first, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_replaces_trigger() {
        let (job, mut rx) = recording_job(Duration::ZERO);
        let (scheduler, x) = Scheduler::start("@every 1m", job).unwrap();

        let fired = next_start(&mut rx).await;
        let y = scheduler.reconfigure("@every 5m").unwrap();
        assert_ne!(x, y);
        assert_eq!(scheduler.active_trigger(), y);
        assert_eq!(scheduler.interval(), ScheduleInterval::EveryFiveMinutes);

        // The old one-minute trigger must not fire again.
        let next = next_start(&mut rx).await;
        assert_about(next - fired, Duration::from_secs(300));

        let after = next_start(&mut rx).await;
        assert_about(after - next, Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_reconfigure_keeps_current_trigger() {
        let (job, mut rx) = recording_job(Duration::ZERO);
        let (scheduler, x) = Scheduler::start("@every 1m", job).unwrap();

        let err = scheduler.reconfigure("*/1 * * * *").unwrap_err();
        assert_eq!(err, ScheduleError::InvalidInterval("*/1 * * * *".to_string()));
        assert_eq!(scheduler.active_trigger(), x);
        assert_eq!(scheduler.interval(), ScheduleInterval::EveryMinute);

        let first = next_start(&mut rx).await;
        let second = next_start(&mut rx).await;
        assert_about(second - first, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_lets_running_cycle_finish() {
        let (job, mut rx) = recording_job(Duration::from_secs(30));
        let (scheduler, _) = Scheduler::start("@every 1m", job).unwrap();

        let started = next_start(&mut rx).await;
        scheduler.reconfigure("@every 10m").unwrap();

        match rx.recv().await.unwrap() {
            Event::Finished(at) => assert_about(at - started, Duration::from_secs(30)),
            other => panic!("unexpected event {:?}", other),
        }

        let next = next_start(&mut rx).await;
        assert_about(next - started, Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycles_may_overlap() {
        let (job, mut rx) = recording_job(Duration::from_secs(90));
        let (_scheduler, _) = Scheduler::start("@every 1m", job).unwrap();

        let first = next_start(&mut rx).await;
        // The second firing starts before the first cycle finishes.
        match rx.recv().await.unwrap() {
            Event::Started(at) => assert_about(at - first, Duration::from_secs(60)),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
