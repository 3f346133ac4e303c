//! Outcome reporting and payload decoding against `PostgreSQL`.

use super::helpers::{BoxError, execute_sql, persisted_state, setup};
use chrono::TimeDelta;
use jobqueue::job::{
    domain::{JobId, JobStatus},
    ports::{JobStoreError, ReportOutcome},
    services::{EnqueueRequest, JobQueueError},
};
use mockable::Clock;
use rstest::rstest;
use serde_json::json;
use std::time::Duration;

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_failures_exhaust_attempts() -> Result<(), BoxError> {
    let Some(context) = setup(2).await? else {
        return Ok(());
    };
    let id = context
        .queue
        .enqueue(EnqueueRequest::new("a", json!({})).with_max_attempts(2))
        .await?;

    context.queue.claim().await?.ok_or("first claim")?;
    let first = context.queue.report_failure(id, None).await?;
    context.queue.claim().await?.ok_or("second claim")?;
    let second = context.queue.report_failure(id, None).await?;

    assert_eq!(first, ReportOutcome::Applied(JobStatus::Pending));
    assert_eq!(second, ReportOutcome::Applied(JobStatus::Failed));
    let job = context.queue.find(id).await?.ok_or("job exists")?;
    assert_eq!(job.attempts(), 2);
    assert!(!job.is_locked());
    assert!(context.queue.claim().await?.is_none());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_retry_time_is_persisted() -> Result<(), BoxError> {
    let Some(context) = setup(2).await? else {
        return Ok(());
    };
    let id = context
        .queue
        .enqueue(EnqueueRequest::new("a", json!({})))
        .await?;
    context.queue.claim().await?.ok_or("claim")?;
    let retry_at = context.clock.utc() + TimeDelta::minutes(15);

    let outcome = context.queue.report_failure(id, Some(retry_at)).await?;

    assert_eq!(outcome, ReportOutcome::Applied(JobStatus::Pending));
    let job = context.queue.find(id).await?.ok_or("job exists")?;
    assert_eq!(job.scheduled_at(), retry_at);
    assert!(context.queue.claim().await?.is_none());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_success_is_terminal_and_idempotent() -> Result<(), BoxError> {
    let Some(context) = setup(2).await? else {
        return Ok(());
    };
    let id = context
        .queue
        .enqueue(EnqueueRequest::new("a", json!({})))
        .await?;
    context.queue.claim().await?.ok_or("claim")?;

    let first = context.queue.report_success(id).await?;
    let second = context.queue.report_success(id).await?;

    assert_eq!(first, ReportOutcome::Applied(JobStatus::Success));
    assert_eq!(second, ReportOutcome::NoMatchingJob);
    let job = context.queue.find(id).await?.ok_or("job exists")?;
    assert!(!job.is_active());
    assert!(job.worker_id().is_none());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_error_keeps_attempts_and_message() -> Result<(), BoxError> {
    let Some(context) = setup(2).await? else {
        return Ok(());
    };
    let id = context
        .queue
        .enqueue(EnqueueRequest::new("a", json!({})))
        .await?;
    context.queue.claim().await?.ok_or("claim")?;

    let outcome = context.queue.report_error(id, "card declined").await?;

    assert_eq!(outcome, ReportOutcome::Applied(JobStatus::Error));
    let job = context.queue.find(id).await?.ok_or("job exists")?;
    assert_eq!(job.attempts(), 0);
    assert_eq!(job.error_message(), Some("card declined"));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_report_for_unknown_job_matches_nothing() -> Result<(), BoxError> {
    let Some(context) = setup(1).await? else {
        return Ok(());
    };

    let outcome = context.queue.report_failure(JobId::new(424_242), None).await?;

    assert_eq!(outcome, ReportOutcome::NoMatchingJob);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_undecodable_payload_moves_job_to_error() -> Result<(), BoxError> {
    let Some(context) = setup(2).await? else {
        return Ok(());
    };
    let id = context
        .queue
        .enqueue(EnqueueRequest::new("a", json!({})))
        .await?;
    execute_sql(
        &context,
        &format!(
            "UPDATE job_queue SET payload = '{{not json' WHERE id = {}",
            id.value()
        ),
    )
    .await?;

    let result = context.queue.claim().await;

    assert!(matches!(
        result,
        Err(JobQueueError::Store(JobStoreError::PayloadDecode { id: failed, .. })) if failed == id
    ));
    assert!(context.queue.claim().await?.is_none());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_corrupt_claimed_row_is_not_reclaimed() -> Result<(), BoxError> {
    let Some(context) = setup(2).await? else {
        return Ok(());
    };
    let id = context
        .queue
        .enqueue(EnqueueRequest::new("a", json!({})))
        .await?;
    execute_sql(
        &context,
        &format!(
            "UPDATE job_queue SET task_name = '   ' WHERE id = {}",
            id.value()
        ),
    )
    .await?;

    let result = context.queue.claim().await;

    assert!(matches!(
        result,
        Err(JobQueueError::Store(JobStoreError::CorruptRow { id: failed, column: "task_name", .. }))
            if failed == id
    ));
    let state = persisted_state(&context, id).await?;
    assert_eq!(state.status, "error");
    assert!(!state.locked);
    assert!(state.error_message.is_some_and(|message| message.contains("task_name")));

    context.clock.advance(TimeDelta::hours(2));
    let released = context
        .queue
        .release_stale(Duration::from_secs(3600))
        .await?;

    assert_eq!(released, 0);
    assert!(context.queue.claim().await?.is_none());
    Ok(())
}
