//! Polling worker that claims jobs and reports their outcomes.

use super::queue::{JobQueueError, JobQueueResult, JobQueueService};
use crate::job::{
    domain::{Job, JobId, TaskName},
    ports::JobStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::Clock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{Instrument, debug, error, info_span, trace, warn};

/// How a handler declares that a job did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobFailure {
    /// A transient failure; the job counts an attempt and may be retried.
    #[error("job failed and may be retried")]
    Retry {
        /// Earliest time of the next attempt; `None` retries immediately.
        retry_at: Option<DateTime<Utc>>,
    },
    /// A non-retryable failure; the job moves to `error`.
    #[error("job failed fatally: {0}")]
    Fatal(String),
}

impl JobFailure {
    /// A transient failure retried as soon as possible.
    #[must_use]
    pub const fn retry() -> Self {
        Self::Retry { retry_at: None }
    }

    /// A transient failure retried no earlier than `retry_at`.
    #[must_use]
    pub const fn retry_at(retry_at: DateTime<Utc>) -> Self {
        Self::Retry {
            retry_at: Some(retry_at),
        }
    }

    /// A fatal failure with the given message.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }
}

/// Application code that processes claimed jobs.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Processes one job.
    ///
    /// # Errors
    ///
    /// Returns a [`JobFailure`] describing how the job should be recorded.
    async fn handle(&self, job: &Job) -> Result<(), JobFailure>;
}

/// Default pause between polls when the queue is empty.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A single-threaded consumer loop bound to one worker identity.
pub struct Worker<S, C, H>
where
    S: JobStore + ?Sized,
    C: Clock + Send + Sync,
    H: JobHandler + ?Sized,
{
    queue: JobQueueService<S, C>,
    handler: Arc<H>,
    task_name: Option<TaskName>,
    poll_interval: Duration,
}

impl<S, C, H> Worker<S, C, H>
where
    S: JobStore + ?Sized,
    C: Clock + Send + Sync,
    H: JobHandler + ?Sized,
{
    /// Creates a worker with its own identity on `queue`'s store.
    #[must_use]
    pub fn new(queue: &JobQueueService<S, C>, handler: Arc<H>) -> Self {
        Self {
            queue: queue.for_worker(),
            handler,
            task_name: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Restricts the worker to one task type.
    #[must_use]
    pub fn for_task(mut self, task_name: TaskName) -> Self {
        self.task_name = Some(task_name);
        self
    }

    /// Sets the pause between polls when nothing is eligible.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Returns the pause between polls when nothing is eligible.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Returns the queue handle carrying this worker's identity.
    #[must_use]
    pub const fn queue(&self) -> &JobQueueService<S, C> {
        &self.queue
    }

    /// Claims, handles, and reports the next eligible job.
    ///
    /// Returns:
    /// - `Ok(Some(job_id))` if a job was claimed (including one whose row
    ///   could not be decoded, which is recorded as an error)
    /// - `Ok(None)` if no job was eligible
    /// - `Err(...)` if claiming or reporting failed
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError`] when the store fails.
    pub async fn run_next(&self) -> JobQueueResult<Option<JobId>> {
        trace!("looking for next job");
        let claimed = match &self.task_name {
            Some(task_name) => self.queue.claim_task(task_name.as_str()).await,
            None => self.queue.claim().await,
        };
        let job = match claimed {
            Ok(Some(job)) => job,
            Ok(None) => return Ok(None),
            Err(err) => return err.undecodable_job().map(Some).ok_or(err),
        };

        let span = info_span!(
            "job",
            job.id = %job.id(),
            job.task = %job.task_name(),
            worker = %self.queue.worker_id()
        );
        let id = job.id();
        async {
            let outcome = match self.handler.handle(&job).await {
                Ok(()) => {
                    debug!("job succeeded");
                    self.queue.report_success(id).await?
                }
                Err(JobFailure::Retry { retry_at }) => {
                    warn!(?retry_at, "job failed");
                    self.queue.report_failure(id, retry_at).await?
                }
                Err(JobFailure::Fatal(message)) => {
                    warn!(%message, "job failed fatally");
                    self.queue.report_error(id, &message).await?
                }
            };
            if !outcome.is_applied() {
                warn!("job was no longer processing when its outcome was reported");
            }
            Ok::<_, JobQueueError>(())
        }
        .instrument(span)
        .await?;
        Ok(Some(id))
    }

    /// Runs jobs until none is eligible and returns how many were claimed.
    ///
    /// # Errors
    ///
    /// Returns the first [`JobQueueError`] raised by the store.
    pub async fn run_until_idle(&self) -> JobQueueResult<usize> {
        let mut processed = 0_usize;
        while self.run_next().await?.is_some() {
            processed = processed.saturating_add(1);
        }
        debug!(processed, "queue drained");
        Ok(processed)
    }

    /// Polls the queue until `shutdown` resolves.
    ///
    /// Store errors are logged and retried after the poll interval.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        loop {
            let pause = match self.run_next().await {
                Ok(Some(_)) => None,
                Ok(None) => {
                    trace!(poll_interval = ?self.poll_interval, "no eligible job, polling again later");
                    Some(self.poll_interval)
                }
                Err(err) => {
                    error!(error = %err, "failed to run job");
                    Some(self.poll_interval)
                }
            };

            match pause {
                Some(pause) => {
                    tokio::select! {
                        () = &mut shutdown => break,
                        () = tokio::time::sleep(pause) => {}
                    }
                }
                None => {
                    if shutdown_requested(&mut shutdown).await {
                        break;
                    }
                }
            }
        }
        debug!(worker = %self.queue.worker_id(), "worker stopped");
    }
}

/// Returns `true` when `shutdown` has already completed, without waiting.
async fn shutdown_requested<F>(shutdown: &mut std::pin::Pin<&mut F>) -> bool
where
    F: Future<Output = ()>,
{
    tokio::select! {
        biased;
        () = shutdown.as_mut() => true,
        () = std::future::ready(()) => false,
    }
}
