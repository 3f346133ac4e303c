//! Job aggregate root and its lifecycle transitions.

use super::{JobDomainError, JobId, JobStatus, TaskName, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Priority given to jobs enqueued without an explicit priority.
///
/// Lower values are claimed first.
pub const DEFAULT_PRIORITY: i32 = 99;

/// Ceiling on the number of failed attempts a job may accumulate.
///
/// Zero means retries are unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaxAttempts(u32);

impl MaxAttempts {
    /// Unlimited retries.
    pub const UNLIMITED: Self = Self(0);

    /// Attempts granted when the producer does not choose.
    pub const DEFAULT: Self = Self(3);

    /// Largest ceiling a store can persist (the range of a SQL `INTEGER`).
    pub const MAX: u32 = i32::MAX.unsigned_abs();

    /// Creates a ceiling; `0` means unlimited.
    ///
    /// # Errors
    ///
    /// Returns [`JobDomainError::MaxAttemptsOutOfRange`] when `value`
    /// exceeds [`Self::MAX`].
    pub const fn new(value: u32) -> Result<Self, JobDomainError> {
        if value > Self::MAX {
            Err(JobDomainError::MaxAttemptsOutOfRange(value))
        } else {
            Ok(Self(value))
        }
    }

    /// Returns the raw ceiling.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Returns `true` when retries are unlimited.
    #[must_use]
    pub const fn is_unlimited(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` when a job that has failed `attempts` times may still
    /// be claimed.
    #[must_use]
    pub const fn allows_claim(self, attempts: u32) -> bool {
        self.is_unlimited() || attempts < self.0
    }

    /// Returns `true` when one more failure on top of `attempts` exhausts
    /// the job.
    #[must_use]
    pub const fn is_exhausted_after_failure(self, attempts: u32) -> bool {
        !self.is_unlimited() && attempts.saturating_add(1) >= self.0
    }
}

impl Default for MaxAttempts {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Validated job data handed to a store for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    /// Task type.
    pub task_name: TaskName,
    /// Structured payload supplied by the producer.
    pub payload: Value,
    /// Ordering key; lower is claimed first.
    pub priority: i32,
    /// Retry ceiling.
    pub max_attempts: MaxAttempts,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Earliest time the job may be claimed.
    pub scheduled_at: DateTime<Utc>,
}

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    task_name: TaskName,
    payload: Value,
    status: JobStatus,
    priority: i32,
    attempts: u32,
    max_attempts: MaxAttempts,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    scheduled_at: DateTime<Utc>,
    worker_id: Option<WorkerId>,
    error_message: Option<String>,
    locked: bool,
    is_active: bool,
}

/// Parameter object for reconstructing a persisted job.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedJobData {
    /// Persisted identifier.
    pub id: JobId,
    /// Persisted task type.
    pub task_name: TaskName,
    /// Decoded payload.
    pub payload: Value,
    /// Persisted status.
    pub status: JobStatus,
    /// Persisted priority.
    pub priority: i32,
    /// Persisted failure count.
    pub attempts: u32,
    /// Persisted retry ceiling.
    pub max_attempts: MaxAttempts,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted last-mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Persisted eligibility timestamp.
    pub scheduled_at: DateTime<Utc>,
    /// Persisted lock owner.
    pub worker_id: Option<WorkerId>,
    /// Persisted fatal error text.
    pub error_message: Option<String>,
    /// Persisted lock flag.
    pub locked: bool,
    /// Persisted activity flag.
    pub is_active: bool,
}

impl Job {
    /// Creates a pending job from insertion data and its assigned identifier.
    #[must_use]
    pub fn enqueued(id: JobId, new_job: NewJob) -> Self {
        let NewJob {
            task_name,
            payload,
            priority,
            max_attempts,
            created_at,
            scheduled_at,
        } = new_job;

        Self {
            id,
            task_name,
            payload,
            status: JobStatus::Pending,
            priority,
            attempts: 0,
            max_attempts,
            created_at,
            updated_at: created_at,
            scheduled_at,
            worker_id: None,
            error_message: None,
            locked: false,
            is_active: true,
        }
    }

    /// Reconstructs a job from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedJobData) -> Self {
        Self {
            id: data.id,
            task_name: data.task_name,
            payload: data.payload,
            status: data.status,
            priority: data.priority,
            attempts: data.attempts,
            max_attempts: data.max_attempts,
            created_at: data.created_at,
            updated_at: data.updated_at,
            scheduled_at: data.scheduled_at,
            worker_id: data.worker_id,
            error_message: data.error_message,
            locked: data.locked,
            is_active: data.is_active,
        }
    }

    /// Returns the job identifier.
    #[must_use]
    pub const fn id(&self) -> JobId {
        self.id
    }

    /// Returns the task type.
    #[must_use]
    pub const fn task_name(&self) -> &TaskName {
        &self.task_name
    }

    /// Returns the structured payload.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Deserializes the payload into a caller-chosen type.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the payload does not match `T`.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub const fn status(&self) -> JobStatus {
        self.status
    }

    /// Returns the ordering key.
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Returns the number of recorded failures.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the retry ceiling.
    #[must_use]
    pub const fn max_attempts(&self) -> MaxAttempts {
        self.max_attempts
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the timestamp of the latest status-affecting mutation.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the earliest time the job may be claimed.
    #[must_use]
    pub const fn scheduled_at(&self) -> DateTime<Utc> {
        self.scheduled_at
    }

    /// Returns the current lock owner, if any.
    #[must_use]
    pub const fn worker_id(&self) -> Option<&WorkerId> {
        self.worker_id.as_ref()
    }

    /// Returns the last recorded fatal error, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Returns `true` while a worker owns the job.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    /// Returns `false` once the job must never be reconsidered.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.is_active
    }

    /// Returns `true` when the claim protocol may select this job at `now`.
    #[must_use]
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending
            && !self.locked
            && self.is_active
            && self.scheduled_at <= now
            && self.max_attempts.allows_claim(self.attempts)
    }

    /// Returns `true` when the job is locked and its last update is at or
    /// before `cutoff`.
    #[must_use]
    pub fn has_stale_lock(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing && self.locked && self.updated_at <= cutoff
    }

    /// Moves a pending job to `processing`, owned by `worker_id`.
    ///
    /// # Errors
    ///
    /// Returns [`JobDomainError::InvalidStateTransition`] unless the job is
    /// pending.
    pub fn claim(&mut self, worker_id: WorkerId, now: DateTime<Utc>) -> Result<(), JobDomainError> {
        self.ensure_transition(JobStatus::Processing)?;
        self.status = JobStatus::Processing;
        self.locked = true;
        self.worker_id = Some(worker_id);
        self.updated_at = now;
        Ok(())
    }

    /// Records a successful run; the job becomes permanently inactive.
    ///
    /// # Errors
    ///
    /// Returns [`JobDomainError::InvalidStateTransition`] unless the job is
    /// processing.
    pub fn record_success(&mut self, now: DateTime<Utc>) -> Result<(), JobDomainError> {
        self.ensure_transition(JobStatus::Success)?;
        self.status = JobStatus::Success;
        self.is_active = false;
        self.unlock(now);
        Ok(())
    }

    /// Records a failed run and returns the resulting status.
    ///
    /// The attempt counter is incremented. The job returns to `pending`,
    /// eligible from `retry_at` (or `now`), unless the failure exhausts
    /// [`MaxAttempts`], in which case it becomes `failed`.
    ///
    /// # Errors
    ///
    /// Returns [`JobDomainError::InvalidStateTransition`] unless the job is
    /// processing.
    pub fn record_failure(
        &mut self,
        retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<JobStatus, JobDomainError> {
        self.ensure_transition(JobStatus::Pending)?;
        let next = if self
            .max_attempts
            .is_exhausted_after_failure(self.attempts)
        {
            JobStatus::Failed
        } else {
            self.scheduled_at = retry_at.unwrap_or(now);
            JobStatus::Pending
        };
        self.attempts = self.attempts.saturating_add(1);
        self.status = next;
        self.unlock(now);
        Ok(next)
    }

    /// Records a fatal application error. The attempt counter is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`JobDomainError::InvalidStateTransition`] unless the job is
    /// processing.
    pub fn record_error(
        &mut self,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), JobDomainError> {
        self.ensure_transition(JobStatus::Error)?;
        self.status = JobStatus::Error;
        self.error_message = Some(message.into());
        self.unlock(now);
        Ok(())
    }

    /// Returns an abandoned job to `pending` without counting an attempt.
    ///
    /// # Errors
    ///
    /// Returns [`JobDomainError::InvalidStateTransition`] unless the job is
    /// processing.
    pub fn release_stale_lock(&mut self, now: DateTime<Utc>) -> Result<(), JobDomainError> {
        self.ensure_transition(JobStatus::Pending)?;
        self.status = JobStatus::Pending;
        self.unlock(now);
        Ok(())
    }

    fn ensure_transition(&self, to: JobStatus) -> Result<(), JobDomainError> {
        if self.status.can_transition_to(to) {
            return Ok(());
        }
        Err(JobDomainError::InvalidStateTransition {
            job_id: self.id,
            from: self.status,
            to,
        })
    }

    fn unlock(&mut self, now: DateTime<Utc>) {
        self.locked = false;
        self.worker_id = None;
        self.updated_at = now;
    }
}
