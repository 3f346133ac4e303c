//! Stale-lock recovery.

use super::helpers::{QueueContext, context};
use chrono::TimeDelta;
use jobqueue::job::{
    domain::JobStatus,
    ports::ReportOutcome,
    services::{EnqueueRequest, JobQueueError, StaleLockReaper},
};
use rstest::rstest;
use serde_json::json;
use std::time::Duration;

const LOCK_AGE: Duration = Duration::from_secs(600);

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn locks_at_least_threshold_old_are_released(context: QueueContext) {
    let old = context
        .queue
        .enqueue(EnqueueRequest::new("old", json!({})).with_priority(1))
        .await
        .expect("enqueue should succeed");
    let young = context
        .queue
        .enqueue(EnqueueRequest::new("young", json!({})).with_priority(2))
        .await
        .expect("enqueue should succeed");

    context.queue.claim().await.expect("claim").expect("old job");
    context.clock.advance(TimeDelta::minutes(5));
    context.queue.claim().await.expect("claim").expect("young job");
    context.clock.advance(TimeDelta::minutes(5));

    let released = context
        .queue
        .release_stale(LOCK_AGE)
        .await
        .expect("release should succeed");

    assert_eq!(released, 1);
    let old_job = context.queue.find(old).await.expect("lookup").expect("job");
    let young_job = context.queue.find(young).await.expect("lookup").expect("job");
    assert_eq!(old_job.status(), JobStatus::Pending);
    assert!(!old_job.is_locked());
    assert!(old_job.worker_id().is_none());
    assert_eq!(old_job.attempts(), 0);
    assert_eq!(young_job.status(), JobStatus::Processing);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn released_job_can_be_claimed_by_another_worker(context: QueueContext) {
    let id = context
        .queue
        .enqueue(EnqueueRequest::new("a", json!({})))
        .await
        .expect("enqueue should succeed");
    context.queue.claim().await.expect("claim").expect("job");
    context.clock.advance(TimeDelta::hours(2));

    context
        .queue
        .release_stale_default()
        .await
        .expect("release should succeed");
    let rescuer = context.queue.for_worker();
    let job = rescuer.claim().await.expect("claim").expect("released job");

    assert_eq!(job.id(), id);
    assert_eq!(job.worker_id(), Some(rescuer.worker_id()));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn late_report_from_original_worker_applies_to_reclaimed_job(context: QueueContext) {
    let id = context
        .queue
        .enqueue(EnqueueRequest::new("a", json!({})))
        .await
        .expect("enqueue should succeed");
    context.queue.claim().await.expect("claim").expect("job");
    context.clock.advance(TimeDelta::hours(2));
    context
        .queue
        .release_stale_default()
        .await
        .expect("release should succeed");

    let while_pending = context.queue.report_success(id).await.expect("report");

    assert_eq!(while_pending, ReportOutcome::NoMatchingJob);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn reaper_sweep_uses_configured_age(context: QueueContext) {
    context
        .queue
        .enqueue(EnqueueRequest::new("a", json!({})))
        .await
        .expect("enqueue should succeed");
    context.queue.claim().await.expect("claim").expect("job");
    context.clock.advance(TimeDelta::seconds(30));

    let reaper =
        StaleLockReaper::new(context.queue.clone()).with_max_lock_age(Duration::from_secs(30));
    let released = reaper.sweep().await.expect("sweep should succeed");

    assert_eq!(released, 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn spawned_reaper_releases_stale_locks(context: QueueContext) {
    let id = context
        .queue
        .enqueue(EnqueueRequest::new("a", json!({})))
        .await
        .expect("enqueue should succeed");
    context.queue.claim().await.expect("claim").expect("job");
    context.clock.advance(TimeDelta::hours(2));

    let handle = StaleLockReaper::new(context.queue.clone())
        .with_interval(Duration::from_millis(10))
        .spawn()
        .expect("reaper should start");
    let mut status = JobStatus::Processing;
    for _ in 0..200 {
        status = context
            .queue
            .find(id)
            .await
            .expect("lookup")
            .expect("job")
            .status();
        if status == JobStatus::Pending {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.stop().await;

    assert_eq!(status, JobStatus::Pending);
}

#[rstest]
#[case(Duration::ZERO, Duration::from_secs(60), "sweep interval")]
#[case(Duration::from_secs(1), Duration::ZERO, "max lock age")]
#[tokio::test(flavor = "multi_thread")]
async fn reaper_with_zero_duration_does_not_start(
    context: QueueContext,
    #[case] interval: Duration,
    #[case] max_lock_age: Duration,
    #[case] expected: &str,
) {
    let result = StaleLockReaper::new(context.queue.clone())
        .with_interval(interval)
        .with_max_lock_age(max_lock_age)
        .spawn();

    assert!(matches!(
        result,
        Err(JobQueueError::ZeroDuration { setting }) if setting == expected
    ));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn zero_lock_age_releases_nothing(context: QueueContext) {
    let id = context
        .queue
        .enqueue(EnqueueRequest::new("a", json!({})))
        .await
        .expect("enqueue should succeed");
    context.queue.claim().await.expect("claim").expect("job");

    let result = context.queue.release_stale(Duration::ZERO).await;

    assert!(matches!(result, Err(JobQueueError::ZeroDuration { .. })));
    let job = context.queue.find(id).await.expect("lookup").expect("job");
    assert_eq!(job.status(), JobStatus::Processing);
}
