//! Periodic release of abandoned job locks.

use super::queue::{JobQueueError, JobQueueResult, JobQueueService};
use crate::job::ports::JobStore;
use mockable::Clock;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Default time between sweeps.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Returns processing jobs whose lock has outlived `max_lock_age` to the
/// queue.
pub struct StaleLockReaper<S, C>
where
    S: JobStore + ?Sized,
    C: Clock + Send + Sync,
{
    queue: JobQueueService<S, C>,
    max_lock_age: Duration,
    interval: Duration,
}

impl<S, C> StaleLockReaper<S, C>
where
    S: JobStore + ?Sized + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a reaper using the queue's configured lock lifetime.
    #[must_use]
    pub fn new(queue: JobQueueService<S, C>) -> Self {
        let max_lock_age = queue.lock_lifetime();
        Self {
            queue,
            max_lock_age,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Overrides the lock age after which a job is released.
    #[must_use]
    pub const fn with_max_lock_age(mut self, max_lock_age: Duration) -> Self {
        self.max_lock_age = max_lock_age;
        self
    }

    /// Sets the time between sweeps.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs one sweep and returns the number of released jobs.
    ///
    /// # Errors
    ///
    /// Propagates the queue error when the sweep fails.
    pub async fn sweep(&self) -> JobQueueResult<usize> {
        self.queue.release_stale(self.max_lock_age).await
    }

    /// Runs sweeps on a background task until the handle is stopped.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::ZeroDuration`] when the sweep interval or
    /// the lock age is zero; no task is started.
    pub fn spawn(self) -> JobQueueResult<ReaperHandle> {
        if self.interval.is_zero() {
            return Err(JobQueueError::ZeroDuration {
                setting: "sweep interval",
            });
        }
        if self.max_lock_age.is_zero() {
            return Err(JobQueueError::ZeroDuration {
                setting: "max lock age",
            });
        }
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval = ?self.interval, max_lock_age = ?self.max_lock_age, "stale lock reaper started");
            loop {
                ticker.tick().await;
                match self.sweep().await {
                    Ok(released) => debug!(released, "stale lock sweep finished"),
                    Err(err) => error!(error = %err, "stale lock sweep failed"),
                }
            }
        });
        Ok(ReaperHandle { task })
    }
}

/// Handle to a running reaper task.
#[derive(Debug)]
pub struct ReaperHandle {
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stops the reaper and waits for its task to finish.
    pub async fn stop(self) {
        self.task.abort();
        match self.task.await {
            Err(err) if !err.is_cancelled() => {
                error!(error = %err, "stale lock reaper task panicked");
            }
            _ => {}
        }
    }
}
