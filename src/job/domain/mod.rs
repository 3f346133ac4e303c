//! Domain model for queued jobs.
//!
//! A [`Job`] moves through the [`JobStatus`] state machine. Every legal edge
//! is encoded here; storage adapters either apply these methods directly or
//! mirror them in conditional SQL updates.

mod error;
mod ids;
mod job;
mod status;

pub use error::{JobDomainError, ParseJobStatusError};
pub use ids::{JobId, TaskName, WorkerId};
pub use job::{DEFAULT_PRIORITY, Job, MaxAttempts, NewJob, PersistedJobData};
pub use status::JobStatus;
