//! Error types for job domain validation and parsing.

use super::{JobId, JobStatus};
use thiserror::Error;

/// Errors returned while constructing or transitioning domain jobs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobDomainError {
    /// The task name is empty after trimming.
    #[error("task name must not be empty")]
    EmptyTaskName,

    /// The task name exceeds the persisted column width.
    #[error("task name is {0} characters long, the maximum is 255")]
    TaskNameTooLong(usize),

    /// The retry ceiling cannot be persisted.
    #[error("max attempts {0} exceeds the maximum of {max}", max = i32::MAX)]
    MaxAttemptsOutOfRange(u32),

    /// The job cannot move from its current status to the requested one.
    #[error("job {job_id} cannot transition from {from} to {to}")]
    InvalidStateTransition {
        /// The job being transitioned.
        job_id: JobId,
        /// Status the job was in.
        from: JobStatus,
        /// Status that was requested.
        to: JobStatus,
    },
}

/// Error returned while parsing job statuses from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown job status: {0}")]
pub struct ParseJobStatusError(pub String);
