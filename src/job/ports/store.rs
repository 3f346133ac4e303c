//! Storage capability contract shared by every queue backend.

use crate::job::domain::{Job, JobId, JobStatus, NewJob, TaskName, WorkerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Result type for job store operations.
pub type JobStoreResult<T> = Result<T, JobStoreError>;

/// Input to the claim protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRequest {
    /// Identity stamped on the claimed job.
    pub worker_id: WorkerId,
    /// Restricts the claim to one task type when set.
    pub task_name: Option<TaskName>,
    /// Reference time for schedule eligibility and `updated_at`.
    pub now: DateTime<Utc>,
}

/// Result of an outcome report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum ReportOutcome {
    /// The job was updated and now has the given status.
    Applied(JobStatus),
    /// No processing job with that identifier exists; nothing changed.
    NoMatchingJob,
}

impl ReportOutcome {
    /// Returns `true` when a row was updated.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// Returns the status the job moved to, if the report applied.
    #[must_use]
    pub const fn status(self) -> Option<JobStatus> {
        match self {
            Self::Applied(status) => Some(status),
            Self::NoMatchingJob => None,
        }
    }
}

/// Job persistence contract.
///
/// Every mutation is a single atomic operation; implementations must never
/// expose a read-then-write window to concurrent callers. Report operations
/// only touch jobs that are currently `processing`, so a job in a terminal
/// state can never be changed through this trait.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Creates the backing schema if it does not exist.
    ///
    /// Calling this on an initialized store is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`JobStoreError::Persistence`] when schema creation fails.
    async fn initialize_schema(&self) -> JobStoreResult<()>;

    /// Stores a new pending job and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`JobStoreError::Serialization`] when the payload cannot be
    /// encoded, or [`JobStoreError::Persistence`] on storage failure.
    async fn enqueue(&self, job: NewJob) -> JobStoreResult<JobId>;

    /// Atomically selects the next eligible job and moves it to
    /// `processing`.
    ///
    /// Eligible jobs are pending, unlocked, active, scheduled at or before
    /// `request.now`, below their attempt ceiling, and match the task
    /// filter. Among them the lowest `priority` wins, then the earliest
    /// `scheduled_at`, then the earliest `created_at`. Returns `None`
    /// without mutating anything when no job is eligible.
    ///
    /// # Errors
    ///
    /// Returns [`JobStoreError::Persistence`] when the claim transaction
    /// fails; state is left exactly as before the call. Returns
    /// [`JobStoreError::PayloadDecode`] or [`JobStoreError::CorruptRow`]
    /// when the claim committed but the stored row could not be decoded.
    async fn claim(&self, request: ClaimRequest) -> JobStoreResult<Option<Job>>;

    /// Marks a processing job as successful and inactive.
    ///
    /// # Errors
    ///
    /// Returns [`JobStoreError::Persistence`] on storage failure.
    async fn report_success(&self, id: JobId, now: DateTime<Utc>) -> JobStoreResult<ReportOutcome>;

    /// Records a failed attempt on a processing job.
    ///
    /// The job becomes `failed` when the attempt exhausts its ceiling,
    /// otherwise `pending` and eligible from `retry_at` (or `now`).
    ///
    /// # Errors
    ///
    /// Returns [`JobStoreError::Persistence`] on storage failure.
    async fn report_failure(
        &self,
        id: JobId,
        retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> JobStoreResult<ReportOutcome>;

    /// Records a fatal error on a processing job without counting an
    /// attempt.
    ///
    /// # Errors
    ///
    /// Returns [`JobStoreError::Persistence`] on storage failure.
    async fn report_error(
        &self,
        id: JobId,
        message: &str,
        now: DateTime<Utc>,
    ) -> JobStoreResult<ReportOutcome>;

    /// Returns every processing job last updated at or before `cutoff` to
    /// `pending`, and reports how many were released.
    ///
    /// # Errors
    ///
    /// Returns [`JobStoreError::Persistence`] on storage failure; no job is
    /// released in that case.
    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> JobStoreResult<usize>;

    /// Finds a job by identifier without locking it.
    ///
    /// # Errors
    ///
    /// Returns [`JobStoreError::Persistence`] on storage failure or
    /// [`JobStoreError::PayloadDecode`] when the payload is unreadable.
    async fn find_by_id(&self, id: JobId) -> JobStoreResult<Option<Job>>;
}

/// Errors returned by job store implementations.
#[derive(Debug, Clone, Error)]
pub enum JobStoreError {
    /// The payload could not be encoded for storage.
    #[error("payload serialization failed: {0}")]
    Serialization(Arc<serde_json::Error>),

    /// The job was claimed but its stored payload could not be decoded.
    #[error("payload of job {id} could not be decoded: {reason}")]
    PayloadDecode {
        /// The claimed job.
        id: JobId,
        /// Decoder message.
        reason: String,
    },

    /// A persisted row violates the job model.
    #[error("job {id} has an invalid persisted {column}: {reason}")]
    CorruptRow {
        /// The offending job.
        id: JobId,
        /// Column name.
        column: &'static str,
        /// Description of the violation.
        reason: String,
    },

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl JobStoreError {
    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }

    /// Wraps a payload encoding error.
    #[must_use]
    pub fn serialization(err: serde_json::Error) -> Self {
        Self::Serialization(Arc::new(err))
    }

    /// Returns the job whose stored row could not be turned into a [`Job`].
    ///
    /// Raised by `claim` after commit, such a job is `processing` and locked
    /// by the claimer, which must move it to `error`.
    #[must_use]
    pub const fn undecodable_job(&self) -> Option<JobId> {
        match self {
            Self::PayloadDecode { id, .. } | Self::CorruptRow { id, .. } => Some(*id),
            Self::Serialization(_) | Self::Persistence(_) => None,
        }
    }
}
