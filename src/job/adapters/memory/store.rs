//! In-memory job store.
//!
//! All state sits behind one mutex, so every operation (including the
//! select-and-lock pair of a claim) runs inside a single critical section.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::job::{
    domain::{Job, JobDomainError, JobId, NewJob},
    ports::{ClaimRequest, JobStore, JobStoreError, JobStoreResult, ReportOutcome},
};

/// Thread-safe in-memory job store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobStore {
    state: Arc<Mutex<InMemoryJobState>>,
}

#[derive(Debug, Default)]
struct InMemoryJobState {
    jobs: BTreeMap<JobId, Job>,
    last_id: i64,
}

impl InMemoryJobStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored jobs in any status.
    ///
    /// # Errors
    ///
    /// Returns [`JobStoreError::Persistence`] if the lock is poisoned.
    pub fn len(&self) -> JobStoreResult<usize> {
        Ok(self.lock()?.jobs.len())
    }

    /// Returns `true` when no job has been stored.
    ///
    /// # Errors
    ///
    /// Returns [`JobStoreError::Persistence`] if the lock is poisoned.
    pub fn is_empty(&self) -> JobStoreResult<bool> {
        Ok(self.lock()?.jobs.is_empty())
    }

    fn lock(&self) -> JobStoreResult<MutexGuard<'_, InMemoryJobState>> {
        self.state
            .lock()
            .map_err(|err| JobStoreError::persistence(std::io::Error::other(err.to_string())))
    }

    /// Applies a transition to a processing job, mapping "no such job" and
    /// "not processing" to [`ReportOutcome::NoMatchingJob`].
    fn report<F>(&self, id: JobId, transition: F) -> JobStoreResult<ReportOutcome>
    where
        F: FnOnce(&mut Job) -> Result<(), JobDomainError>,
    {
        let mut state = self.lock()?;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(ReportOutcome::NoMatchingJob);
        };
        match transition(job) {
            Ok(()) => Ok(ReportOutcome::Applied(job.status())),
            Err(JobDomainError::InvalidStateTransition { .. }) => Ok(ReportOutcome::NoMatchingJob),
            Err(err) => Err(JobStoreError::persistence(err)),
        }
    }
}

/// Ordering key of the claim protocol: priority ascending, then schedule,
/// then creation, then identifier.
fn claim_order(job: &Job) -> (i32, DateTime<Utc>, DateTime<Utc>, JobId) {
    (job.priority(), job.scheduled_at(), job.created_at(), job.id())
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn initialize_schema(&self) -> JobStoreResult<()> {
        Ok(())
    }

    async fn enqueue(&self, job: NewJob) -> JobStoreResult<JobId> {
        let mut state = self.lock()?;
        state.last_id = state.last_id.saturating_add(1);
        let id = JobId::new(state.last_id);
        state.jobs.insert(id, Job::enqueued(id, job));
        Ok(id)
    }

    async fn claim(&self, request: ClaimRequest) -> JobStoreResult<Option<Job>> {
        let ClaimRequest {
            worker_id,
            task_name,
            now,
        } = request;
        let mut state = self.lock()?;

        let next_id = state
            .jobs
            .values()
            .filter(|job| job.is_claimable_at(now))
            .filter(|job| task_name.as_ref().is_none_or(|name| job.task_name() == name))
            .min_by_key(|job| claim_order(job))
            .map(Job::id);

        let Some(id) = next_id else {
            return Ok(None);
        };
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.claim(worker_id, now).map_err(JobStoreError::persistence)?;
        Ok(Some(job.clone()))
    }

    async fn report_success(&self, id: JobId, now: DateTime<Utc>) -> JobStoreResult<ReportOutcome> {
        self.report(id, |job| job.record_success(now))
    }

    async fn report_failure(
        &self,
        id: JobId,
        retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> JobStoreResult<ReportOutcome> {
        self.report(id, |job| job.record_failure(retry_at, now).map(|_| ()))
    }

    async fn report_error(
        &self,
        id: JobId,
        message: &str,
        now: DateTime<Utc>,
    ) -> JobStoreResult<ReportOutcome> {
        self.report(id, |job| job.record_error(message, now))
    }

    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> JobStoreResult<usize> {
        let mut state = self.lock()?;
        let released = state
            .jobs
            .values_mut()
            .filter(|job| job.has_stale_lock(cutoff))
            .filter_map(|job| job.release_stale_lock(now).ok())
            .count();
        Ok(released)
    }

    async fn find_by_id(&self, id: JobId) -> JobStoreResult<Option<Job>> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }
}
