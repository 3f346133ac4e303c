//! Diesel row models for job persistence.

use super::schema::job_queue;
use crate::job::{
    domain::{Job, JobId, JobStatus, MaxAttempts, NewJob, PersistedJobData, TaskName, WorkerId},
    ports::{JobStoreError, JobStoreResult},
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;

/// Query result row for job records.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = job_queue)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct JobRow {
    /// Store-assigned identifier.
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub id: i64,
    /// Task type.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub task_name: String,
    /// Serialized JSON payload.
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub payload: String,
    /// Lifecycle status.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub status: String,
    /// Ordering key.
    #[diesel(sql_type = diesel::sql_types::Integer)]
    pub priority: i32,
    /// Recorded failures.
    #[diesel(sql_type = diesel::sql_types::Integer)]
    pub attempts: i32,
    /// Retry ceiling.
    #[diesel(sql_type = diesel::sql_types::Integer)]
    pub max_attempts: i32,
    /// Creation timestamp.
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    pub created_at: DateTime<Utc>,
    /// Last status-affecting mutation.
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    pub updated_at: DateTime<Utc>,
    /// Earliest claim time.
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    pub scheduled_at: DateTime<Utc>,
    /// Current lock owner.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Varchar>)]
    pub worker_id: Option<String>,
    /// Last fatal error text.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Text>)]
    pub error_message: Option<String>,
    /// Lock flag.
    #[diesel(sql_type = diesel::sql_types::Bool)]
    pub locked: bool,
    /// Activity flag.
    #[diesel(sql_type = diesel::sql_types::Bool)]
    pub is_active: bool,
}

/// Insert model for job records.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = job_queue)]
pub struct NewJobRow {
    /// Task type.
    pub task_name: String,
    /// Serialized JSON payload.
    pub payload: String,
    /// Lifecycle status.
    pub status: String,
    /// Ordering key.
    pub priority: i32,
    /// Recorded failures.
    pub attempts: i32,
    /// Retry ceiling.
    pub max_attempts: i32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last status-affecting mutation.
    pub updated_at: DateTime<Utc>,
    /// Earliest claim time.
    pub scheduled_at: DateTime<Utc>,
    /// Lock flag.
    pub locked: bool,
    /// Activity flag.
    pub is_active: bool,
}

/// Identifier of the row chosen by the claim candidate query.
#[derive(Debug, Clone, Copy, QueryableByName)]
pub struct CandidateRow {
    /// Candidate job identifier.
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub id: i64,
}

/// Status returned by a conditional report update.
#[derive(Debug, Clone, QueryableByName)]
pub struct StatusRow {
    /// Status after the update.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub status: String,
}

impl NewJobRow {
    /// Encodes a validated job for insertion.
    pub fn try_from_domain(job: &NewJob) -> JobStoreResult<Self> {
        let payload = serde_json::to_string(&job.payload).map_err(JobStoreError::serialization)?;
        let max_attempts =
            i32::try_from(job.max_attempts.value()).map_err(JobStoreError::persistence)?;

        Ok(Self {
            task_name: job.task_name.as_str().to_owned(),
            payload,
            status: JobStatus::Pending.as_str().to_owned(),
            priority: job.priority,
            attempts: 0,
            max_attempts,
            created_at: job.created_at,
            updated_at: job.created_at,
            scheduled_at: job.scheduled_at,
            locked: false,
            is_active: true,
        })
    }
}

/// Converts a persisted row into a domain job, decoding the payload.
pub fn row_to_job(row: JobRow) -> JobStoreResult<Job> {
    let JobRow {
        id: raw_id,
        task_name: persisted_task_name,
        payload: persisted_payload,
        status: persisted_status,
        priority,
        attempts: persisted_attempts,
        max_attempts: persisted_max_attempts,
        created_at,
        updated_at,
        scheduled_at,
        worker_id,
        error_message,
        locked,
        is_active,
    } = row;
    let id = JobId::new(raw_id);
    let corrupt = |column: &'static str, reason: String| JobStoreError::CorruptRow {
        id,
        column,
        reason,
    };

    let task_name =
        TaskName::new(persisted_task_name).map_err(|err| corrupt("task_name", err.to_string()))?;
    let status = persisted_status
        .parse::<JobStatus>()
        .map_err(|err| corrupt("status", err.to_string()))?;
    let attempts =
        u32::try_from(persisted_attempts).map_err(|err| corrupt("attempts", err.to_string()))?;
    let max_attempts = u32::try_from(persisted_max_attempts)
        .map_err(|err| corrupt("max_attempts", err.to_string()))
        .and_then(|value| {
            MaxAttempts::new(value).map_err(|err| corrupt("max_attempts", err.to_string()))
        })?;
    let payload = serde_json::from_str(&persisted_payload).map_err(|err| {
        JobStoreError::PayloadDecode {
            id,
            reason: err.to_string(),
        }
    })?;

    Ok(Job::from_persisted(PersistedJobData {
        id,
        task_name,
        payload,
        status,
        priority,
        attempts,
        max_attempts,
        created_at,
        updated_at,
        scheduled_at,
        worker_id: worker_id.map(WorkerId::from_persisted),
        error_message,
        locked,
        is_active,
    }))
}

/// Parses the status returned by a report update.
pub fn parse_reported_status(id: JobId, row: StatusRow) -> JobStoreResult<JobStatus> {
    row.status
        .parse::<JobStatus>()
        .map_err(|err| JobStoreError::CorruptRow {
            id,
            column: "status",
            reason: err.to_string(),
        })
}
