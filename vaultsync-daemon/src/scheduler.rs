//! Periodic sync trigger.
//!
//! The first tick fires one full interval after activation. Every tick spawns
//! its job, even while an earlier one is still running; the orchestrator's
//! session guard rejects the overlap.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Owns the ticking task. Dropping the handle cancels it.
#[derive(Debug)]
pub struct SchedulerHandle {
    period: Duration,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct SyncScheduler;

impl SyncScheduler {
    /// Tick `job` every `interval_minutes`. `0` disables the scheduler and
    /// returns `None`. Must be called inside a tokio runtime.
    pub fn start<F, Fut>(interval_minutes: u64, job: F) -> Option<SchedulerHandle>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if interval_minutes == 0 {
            tracing::info!("periodic sync disabled");
            return None;
        }
        Some(Self::start_every(
            Duration::from_secs(interval_minutes * 60),
            job,
        ))
    }

    /// Tick `job` every `period`.
    pub fn start_every<F, Fut>(period: Duration, mut job: F) -> SchedulerHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                tracing::debug!(?period, "scheduled sync tick");
                tokio::spawn(job());
            }
        });
        tracing::info!(?period, "periodic sync scheduled");
        SchedulerHandle { period, task }
    }
}
