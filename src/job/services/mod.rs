//! Application services for producing, claiming, and recovering jobs.

mod queue;
mod reaper;
mod worker;

pub use queue::{
    DEFAULT_LOCK_LIFETIME, EnqueueRequest, JobQueueError, JobQueueResult, JobQueueService,
};
pub use reaper::{ReaperHandle, StaleLockReaper};
pub use worker::{JobFailure, JobHandler, Worker};
