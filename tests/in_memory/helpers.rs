//! Shared test helpers for in-memory queue integration tests.

use crate::test_helpers::{ManualClock, epoch};
use jobqueue::job::{
    adapters::memory::InMemoryJobStore,
    domain::JobId,
    services::{EnqueueRequest, JobQueueService},
};
use rstest::fixture;
use serde_json::json;
use std::sync::Arc;

/// Queue handle type used throughout the in-memory tests.
pub type TestQueue = JobQueueService<InMemoryJobStore, ManualClock>;

/// Queue and the clock driving it.
pub struct QueueContext {
    /// Queue handle.
    pub queue: TestQueue,
    /// Clock shared with the queue.
    pub clock: Arc<ManualClock>,
}

/// Provides a fresh queue on an empty store with a frozen clock.
#[fixture]
pub fn context() -> QueueContext {
    let clock = Arc::new(ManualClock::starting_at(epoch()));
    let queue = JobQueueService::new(Arc::new(InMemoryJobStore::new()), Arc::clone(&clock));
    QueueContext { queue, clock }
}

/// Enqueues a job for `task` with the given priority.
pub async fn enqueue_with_priority(queue: &TestQueue, task: &str, priority: i32) -> JobId {
    queue
        .enqueue(EnqueueRequest::new(task, json!({"task": task})).with_priority(priority))
        .await
        .expect("enqueue should succeed")
}
