//! Claim ordering, filtering, and exclusivity against `PostgreSQL`.

use super::helpers::{BoxError, setup};
use chrono::TimeDelta;
use jobqueue::job::{domain::JobStatus, services::EnqueueRequest};
use mockable::Clock;
use rstest::rstest;
use serde_json::json;
use std::collections::HashSet;

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_claim_round_trips_payload() -> Result<(), BoxError> {
    let Some(context) = setup(2).await? else {
        return Ok(());
    };
    let payload = json!({"to": "ops@example.com", "cc": ["a", "b"], "n": 3.5});
    let id = context
        .queue
        .enqueue(EnqueueRequest::new("send_email", payload.clone()))
        .await?;

    let job = context
        .queue
        .claim()
        .await?
        .ok_or("expected an eligible job")?;

    assert_eq!(job.id(), id);
    assert_eq!(job.payload(), &payload);
    assert_eq!(job.status(), JobStatus::Processing);
    assert!(job.is_locked());
    assert_eq!(job.worker_id(), Some(context.queue.worker_id()));
    assert_eq!(job.updated_at(), context.clock.utc());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_claims_lower_priority_first() -> Result<(), BoxError> {
    let Some(context) = setup(2).await? else {
        return Ok(());
    };
    for priority in [10, 1, 5] {
        context
            .queue
            .enqueue(EnqueueRequest::new("p", json!({})).with_priority(priority))
            .await?;
    }

    let mut order = Vec::new();
    while let Some(job) = context.queue.claim().await? {
        order.push(job.priority());
    }

    assert_eq!(order, vec![1, 5, 10]);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_claim_skips_future_and_filtered_jobs() -> Result<(), BoxError> {
    let Some(context) = setup(2).await? else {
        return Ok(());
    };
    context
        .queue
        .enqueue(
            EnqueueRequest::new("digest", json!({}))
                .scheduled_at(context.clock.utc() + TimeDelta::hours(1)),
        )
        .await?;
    let email = context
        .queue
        .enqueue(EnqueueRequest::new("email", json!({})))
        .await?;

    assert!(context.queue.claim_task("digest").await?.is_none());
    let claimed = context
        .queue
        .claim_task("email")
        .await?
        .ok_or("expected the email job")?;
    assert_eq!(claimed.id(), email);

    context.clock.advance(TimeDelta::hours(1));
    assert!(context.queue.claim_task("digest").await?.is_some());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn postgres_concurrent_claims_never_share_a_job() -> Result<(), BoxError> {
    let Some(context) = setup(8).await? else {
        return Ok(());
    };
    for index in 0..40 {
        context
            .queue
            .enqueue(EnqueueRequest::new("work", json!({"index": index})))
            .await?;
    }

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let queue = context.queue.for_worker();
            tokio::spawn(async move {
                let mut ids = Vec::new();
                while let Some(job) = queue.claim().await? {
                    ids.push(job.id());
                }
                Ok::<_, jobqueue::job::services::JobQueueError>(ids)
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await?? {
            assert!(seen.insert(id), "job {id} was claimed twice");
        }
    }
    assert_eq!(seen.len(), 40);
    Ok(())
}
