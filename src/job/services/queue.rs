//! Queue service: the handle producers and workers share.

use crate::job::{
    domain::{
        DEFAULT_PRIORITY, Job, JobDomainError, JobId, MaxAttempts, NewJob, TaskName, WorkerId,
    },
    ports::{ClaimRequest, JobStore, JobStoreError, ReportOutcome},
};
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};

/// Lock age after which a processing job is presumed abandoned.
pub const DEFAULT_LOCK_LIFETIME: Duration = Duration::from_secs(3600);

/// When an enqueued job becomes eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schedule {
    Immediately,
    At(DateTime<Utc>),
    After(Duration),
}

/// Request payload for enqueueing a job.
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueRequest {
    task_name: String,
    payload: Value,
    priority: i32,
    max_attempts: u32,
    schedule: Schedule,
}

impl EnqueueRequest {
    /// Creates a request with default priority, three attempts, and
    /// immediate eligibility.
    #[must_use]
    pub fn new(task_name: impl Into<String>, payload: Value) -> Self {
        Self {
            task_name: task_name.into(),
            payload,
            priority: DEFAULT_PRIORITY,
            max_attempts: MaxAttempts::DEFAULT.value(),
            schedule: Schedule::Immediately,
        }
    }

    /// Creates a request whose payload is the JSON form of `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::Store`] wrapping
    /// [`JobStoreError::Serialization`] when `payload` cannot be represented
    /// as JSON.
    pub fn from_serializable<T: Serialize>(
        task_name: impl Into<String>,
        payload: &T,
    ) -> JobQueueResult<Self> {
        let value = serde_json::to_value(payload).map_err(JobStoreError::serialization)?;
        Ok(Self::new(task_name, value))
    }

    /// Sets the priority; lower values are claimed first.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the retry ceiling; `0` means unlimited.
    ///
    /// Values above [`MaxAttempts::MAX`] are rejected by
    /// [`JobQueueService::enqueue`].
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Makes the job eligible no earlier than `at`.
    #[must_use]
    pub const fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.schedule = Schedule::At(at);
        self
    }

    /// Makes the job eligible `delay` after it is enqueued.
    #[must_use]
    pub const fn delayed_by(mut self, delay: Duration) -> Self {
        self.schedule = Schedule::After(delay);
        self
    }
}

/// Service-level errors for queue operations.
#[derive(Debug, Error)]
pub enum JobQueueError {
    /// Domain validation failed.
    #[error(transparent)]
    Domain(#[from] JobDomainError),
    /// Store operation failed.
    #[error(transparent)]
    Store(#[from] JobStoreError),
    /// A duration could not be applied to a timestamp.
    #[error("duration {0:?} is out of range for timestamp arithmetic")]
    DurationOutOfRange(Duration),
    /// A duration that must be positive was zero.
    #[error("{setting} must be greater than zero")]
    ZeroDuration {
        /// The offending setting.
        setting: &'static str,
    },
}

impl JobQueueError {
    /// Returns the job whose stored row could not be decoded, when that is
    /// the failure.
    #[must_use]
    pub const fn undecodable_job(&self) -> Option<JobId> {
        match self {
            Self::Store(err) => err.undecodable_job(),
            Self::Domain(_) | Self::DurationOutOfRange(_) | Self::ZeroDuration { .. } => None,
        }
    }
}

/// Result type for queue service operations.
pub type JobQueueResult<T> = Result<T, JobQueueError>;

/// Queue handle shared by producers and workers.
///
/// Each handle carries the [`WorkerId`] stamped on the jobs it claims. Use
/// [`Self::for_worker`] to derive a handle with a fresh identity for each
/// concurrent worker.
pub struct JobQueueService<S, C>
where
    S: JobStore + ?Sized,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    clock: Arc<C>,
    worker_id: WorkerId,
    lock_lifetime: Duration,
}

impl<S, C> Clone for JobQueueService<S, C>
where
    S: JobStore + ?Sized,
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            worker_id: self.worker_id.clone(),
            lock_lifetime: self.lock_lifetime,
        }
    }
}

impl<S, C> JobQueueService<S, C>
where
    S: JobStore + ?Sized,
    C: Clock + Send + Sync,
{
    /// Creates a queue handle with a freshly generated worker identity.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self {
            store,
            clock,
            worker_id: WorkerId::generate(),
            lock_lifetime: DEFAULT_LOCK_LIFETIME,
        }
    }

    /// Replaces the worker identity stamped on claimed jobs.
    #[must_use]
    pub fn with_worker_id(mut self, worker_id: WorkerId) -> Self {
        self.worker_id = worker_id;
        self
    }

    /// Sets the lock age used by [`Self::release_stale_default`].
    #[must_use]
    pub const fn with_lock_lifetime(mut self, lock_lifetime: Duration) -> Self {
        self.lock_lifetime = lock_lifetime;
        self
    }

    /// Returns a handle on the same store with a new worker identity.
    #[must_use]
    pub fn for_worker(&self) -> Self {
        self.clone().with_worker_id(WorkerId::generate())
    }

    /// Returns the identity stamped on jobs claimed through this handle.
    #[must_use]
    pub const fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Returns the configured stale-lock threshold.
    #[must_use]
    pub const fn lock_lifetime(&self) -> Duration {
        self.lock_lifetime
    }

    /// Returns the underlying store.
    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Creates the backing schema if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::Store`] when schema creation fails.
    pub async fn initialize(&self) -> JobQueueResult<()> {
        self.store.initialize_schema().await?;
        Ok(())
    }

    /// Enqueues a job and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::Domain`] for an invalid task name or retry
    /// ceiling,
    /// [`JobQueueError::DurationOutOfRange`] for an unrepresentable delay,
    /// or [`JobQueueError::Store`] when persistence fails.
    #[instrument(name = "jobqueue.enqueue", skip(self, request), fields(task = %request.task_name))]
    pub async fn enqueue(&self, request: EnqueueRequest) -> JobQueueResult<JobId> {
        let EnqueueRequest {
            task_name: raw_task_name,
            payload,
            priority,
            max_attempts,
            schedule,
        } = request;
        let task_name = TaskName::new(raw_task_name)?;
        let max_attempts = MaxAttempts::new(max_attempts)?;
        let now = self.clock.utc();
        let scheduled_at = match schedule {
            Schedule::Immediately => now,
            Schedule::At(at) => at,
            Schedule::After(delay) => offset(now, delay, Direction::Forward)?,
        };

        let id = self
            .store
            .enqueue(NewJob {
                task_name,
                payload,
                priority,
                max_attempts,
                created_at: now,
                scheduled_at,
            })
            .await?;
        debug!(job.id = %id, %scheduled_at, priority, "enqueued job");
        Ok(id)
    }

    /// Claims the next eligible job of any task type.
    ///
    /// Returns `Ok(None)` when nothing is eligible.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::Store`] when the claim transaction fails.
    /// When the claimed row cannot be decoded, the job is moved to `error`
    /// and the decoding error ([`JobStoreError::PayloadDecode`] or
    /// [`JobStoreError::CorruptRow`]) is returned.
    #[instrument(name = "jobqueue.claim", skip(self), fields(worker = %self.worker_id))]
    pub async fn claim(&self) -> JobQueueResult<Option<Job>> {
        self.claim_filtered(None).await
    }

    /// Claims the next eligible job whose task name is `task_name`.
    ///
    /// # Errors
    ///
    /// As [`Self::claim`], plus [`JobQueueError::Domain`] for an invalid
    /// task name.
    #[instrument(name = "jobqueue.claim_task", skip(self), fields(worker = %self.worker_id))]
    pub async fn claim_task(&self, task_name: &str) -> JobQueueResult<Option<Job>> {
        let filter = TaskName::new(task_name)?;
        self.claim_filtered(Some(filter)).await
    }

    async fn claim_filtered(&self, task_name: Option<TaskName>) -> JobQueueResult<Option<Job>> {
        let request = ClaimRequest {
            worker_id: self.worker_id.clone(),
            task_name,
            now: self.clock.utc(),
        };

        match self.store.claim(request).await {
            Ok(Some(job)) => {
                debug!(job.id = %job.id(), task = %job.task_name(), attempts = job.attempts(), "claimed job");
                Ok(Some(job))
            }
            Ok(None) => {
                trace!("no eligible job");
                Ok(None)
            }
            Err(err) => {
                if let Some(id) = err.undecodable_job() {
                    warn!(job.id = %id, error = %err, "claimed job could not be decoded");
                    let message = err.to_string();
                    let outcome = self.store.report_error(id, &message, self.clock.utc()).await?;
                    debug!(job.id = %id, ?outcome, "recorded decode error");
                }
                Err(err.into())
            }
        }
    }

    /// Marks a processing job as successful.
    ///
    /// Returns [`ReportOutcome::NoMatchingJob`] when `id` is unknown or the
    /// job is not processing (for example on a repeated report).
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::Store`] when persistence fails.
    #[instrument(name = "jobqueue.report_success", skip(self))]
    pub async fn report_success(&self, id: JobId) -> JobQueueResult<ReportOutcome> {
        let outcome = self.store.report_success(id, self.clock.utc()).await?;
        log_outcome(id, outcome);
        Ok(outcome)
    }

    /// Records a failed attempt; the job is retried from `retry_at` (or
    /// immediately) unless its attempts are exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::Store`] when persistence fails.
    #[instrument(name = "jobqueue.report_failure", skip(self))]
    pub async fn report_failure(
        &self,
        id: JobId,
        retry_at: Option<DateTime<Utc>>,
    ) -> JobQueueResult<ReportOutcome> {
        let outcome = self
            .store
            .report_failure(id, retry_at, self.clock.utc())
            .await?;
        log_outcome(id, outcome);
        Ok(outcome)
    }

    /// Records a fatal, non-retryable error.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::Store`] when persistence fails.
    #[instrument(name = "jobqueue.report_error", skip(self, message))]
    pub async fn report_error(&self, id: JobId, message: &str) -> JobQueueResult<ReportOutcome> {
        let outcome = self
            .store
            .report_error(id, message, self.clock.utc())
            .await?;
        log_outcome(id, outcome);
        Ok(outcome)
    }

    /// Returns processing jobs locked for at least `max_lock_age` to
    /// `pending`, and reports how many were released.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::ZeroDuration`] for a zero age, which would
    /// release live locks, [`JobQueueError::DurationOutOfRange`] for an
    /// unrepresentable age, or [`JobQueueError::Store`] when the sweep fails.
    #[instrument(name = "jobqueue.release_stale", skip(self))]
    pub async fn release_stale(&self, max_lock_age: Duration) -> JobQueueResult<usize> {
        if max_lock_age.is_zero() {
            return Err(JobQueueError::ZeroDuration {
                setting: "max lock age",
            });
        }
        let now = self.clock.utc();
        let cutoff = offset(now, max_lock_age, Direction::Backward)?;
        let released = self.store.release_stale(cutoff, now).await?;
        if released > 0 {
            info!(released, %cutoff, "released stale job locks");
        }
        Ok(released)
    }

    /// Runs [`Self::release_stale`] with the configured lock lifetime.
    ///
    /// # Errors
    ///
    /// As [`Self::release_stale`].
    pub async fn release_stale_default(&self) -> JobQueueResult<usize> {
        self.release_stale(self.lock_lifetime).await
    }

    /// Looks a job up without claiming it.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::Store`] when the lookup fails.
    pub async fn find(&self, id: JobId) -> JobQueueResult<Option<Job>> {
        Ok(self.store.find_by_id(id).await?)
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

fn offset(
    at: DateTime<Utc>,
    duration: Duration,
    direction: Direction,
) -> JobQueueResult<DateTime<Utc>> {
    let delta =
        TimeDelta::from_std(duration).map_err(|_| JobQueueError::DurationOutOfRange(duration))?;
    let shifted = match direction {
        Direction::Forward => at.checked_add_signed(delta),
        Direction::Backward => at.checked_sub_signed(delta),
    };
    shifted.ok_or(JobQueueError::DurationOutOfRange(duration))
}

fn log_outcome(id: JobId, outcome: ReportOutcome) {
    match outcome {
        ReportOutcome::Applied(status) => debug!(job.id = %id, %status, "reported job outcome"),
        ReportOutcome::NoMatchingJob => {
            warn!(job.id = %id, "no processing job matched the report");
        }
    }
}
