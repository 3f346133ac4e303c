//! Enqueue, claim, and outcome reporting through the queue service.

use super::helpers::{QueueContext, context};
use jobqueue::job::{
    domain::{JobId, JobStatus},
    ports::ReportOutcome,
    services::EnqueueRequest,
};
use rstest::rstest;
use serde_json::json;
use std::time::Duration;

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn claimed_payload_matches_enqueued_payload(context: QueueContext) {
    let payload = json!({
        "recipient": "ops@example.com",
        "attachments": [{"name": "report.pdf", "bytes": 1024}],
        "urgent": true,
        "retries": null
    });
    let id = context
        .queue
        .enqueue(EnqueueRequest::new("send_email", payload.clone()))
        .await
        .expect("enqueue should succeed");

    let job = context
        .queue
        .claim()
        .await
        .expect("claim should succeed")
        .expect("job should be eligible");

    assert_eq!(job.id(), id);
    assert_eq!(job.payload(), &payload);
    assert_eq!(job.status(), JobStatus::Processing);
    assert_eq!(job.worker_id(), Some(context.queue.worker_id()));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn claimed_job_is_not_returned_again(context: QueueContext) {
    context
        .queue
        .enqueue(EnqueueRequest::new("a", json!({})))
        .await
        .expect("enqueue should succeed");

    let first = context.queue.claim().await.expect("claim");
    let second = context.queue.for_worker().claim().await.expect("claim");

    assert!(first.is_some());
    assert!(second.is_none());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn successful_job_is_never_claimable_again(context: QueueContext) {
    let id = context
        .queue
        .enqueue(EnqueueRequest::new("a", json!({})))
        .await
        .expect("enqueue should succeed");
    context.queue.claim().await.expect("claim").expect("job");

    let outcome = context.queue.report_success(id).await.expect("report");
    context.clock.advance(chrono::TimeDelta::days(2));
    let released = context
        .queue
        .release_stale(Duration::from_secs(1))
        .await
        .expect("release should succeed");

    assert_eq!(outcome, ReportOutcome::Applied(JobStatus::Success));
    assert_eq!(released, 0);
    assert!(context.queue.claim().await.expect("claim").is_none());
    let job = context.queue.find(id).await.expect("lookup").expect("job");
    assert_eq!(job.status(), JobStatus::Success);
    assert!(!job.is_active());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn error_outcome_is_terminal(context: QueueContext) {
    let id = context
        .queue
        .enqueue(EnqueueRequest::new("a", json!({})))
        .await
        .expect("enqueue should succeed");
    context.queue.claim().await.expect("claim").expect("job");

    let outcome = context
        .queue
        .report_error(id, "recipient rejected")
        .await
        .expect("report");

    assert_eq!(outcome, ReportOutcome::Applied(JobStatus::Error));
    assert!(context.queue.claim().await.expect("claim").is_none());
    let late_success = context.queue.report_success(id).await.expect("report");
    assert_eq!(late_success, ReportOutcome::NoMatchingJob);
    let job = context.queue.find(id).await.expect("lookup").expect("job");
    assert_eq!(job.status(), JobStatus::Error);
    assert_eq!(job.error_message(), Some("recipient rejected"));
}

#[rstest]
#[case::success(0)]
#[case::failure(1)]
#[case::error(2)]
#[tokio::test(flavor = "multi_thread")]
async fn reports_for_unknown_jobs_change_nothing(context: QueueContext, #[case] kind: u8) {
    let unknown = JobId::new(9_999);
    let outcome = match kind {
        0 => context.queue.report_success(unknown).await,
        1 => context.queue.report_failure(unknown, None).await,
        _ => context.queue.report_error(unknown, "nope").await,
    }
    .expect("report should not error");

    assert_eq!(outcome, ReportOutcome::NoMatchingJob);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn delayed_job_waits_until_its_schedule(context: QueueContext) {
    let id = context
        .queue
        .enqueue(
            EnqueueRequest::new("digest", json!({})).delayed_by(Duration::from_secs(3600)),
        )
        .await
        .expect("enqueue should succeed");

    assert!(context.queue.claim().await.expect("claim").is_none());
    context.clock.advance(chrono::TimeDelta::minutes(59));
    assert!(context.queue.claim().await.expect("claim").is_none());
    context.clock.advance(chrono::TimeDelta::minutes(1));
    let job = context.queue.claim().await.expect("claim").expect("job is due");
    assert_eq!(job.id(), id);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn claim_task_only_returns_matching_jobs(context: QueueContext) {
    context
        .queue
        .enqueue(EnqueueRequest::new("email", json!({})).with_priority(1))
        .await
        .expect("enqueue should succeed");
    let resize = context
        .queue
        .enqueue(EnqueueRequest::new("resize", json!({})).with_priority(50))
        .await
        .expect("enqueue should succeed");

    let job = context
        .queue
        .claim_task("resize")
        .await
        .expect("claim")
        .expect("resize job");

    assert_eq!(job.id(), resize);
    assert!(context.queue.claim_task("resize").await.expect("claim").is_none());
}
