//! `PostgreSQL` job store.
//!
//! Claims run in a transaction that selects the candidate row with
//! `FOR UPDATE SKIP LOCKED` and updates it before commit, so concurrent
//! claimers skip rows another transaction is taking instead of blocking on
//! them or receiving them twice. Reports and stale-lock releases are single
//! conditional `UPDATE` statements.

use super::{
    models::{
        CandidateRow, JobRow, NewJobRow, StatusRow, parse_reported_status, row_to_job,
    },
    schema::job_queue,
};
use crate::job::{
    domain::{Job, JobId, JobStatus, NewJob},
    ports::{ClaimRequest, JobStore, JobStoreError, JobStoreResult, ReportOutcome},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::Error as DieselError;
use diesel::sql_types::{BigInt, Nullable, Timestamptz, Varchar};

/// `PostgreSQL` connection pool type used by the job store.
pub type JobPgPool = Pool<ConnectionManager<PgConnection>>;

/// Idempotent schema script applied by [`JobStore::initialize_schema`].
const SCHEMA_SQL: &str =
    include_str!("../../../../migrations/2026-03-01-000000_create_job_queue/up.sql");

const CLAIM_CANDIDATE_SQL: &str = concat!(
    "SELECT id FROM job_queue ",
    "WHERE status = 'pending' ",
    "AND locked = FALSE ",
    "AND is_active = TRUE ",
    "AND scheduled_at <= $1 ",
    "AND (max_attempts = 0 OR attempts < max_attempts) ",
    "AND ($2::VARCHAR IS NULL OR task_name = $2) ",
    "ORDER BY priority ASC, scheduled_at ASC, created_at ASC, id ASC ",
    "LIMIT 1 ",
    "FOR UPDATE SKIP LOCKED",
);

const REPORT_FAILURE_SQL: &str = concat!(
    "UPDATE job_queue SET ",
    "status = CASE WHEN max_attempts <> 0 AND attempts + 1 >= max_attempts ",
    "THEN 'failed' ELSE 'pending' END, ",
    "scheduled_at = CASE WHEN max_attempts <> 0 AND attempts + 1 >= max_attempts ",
    "THEN scheduled_at ELSE $2 END, ",
    "attempts = attempts + 1, ",
    "locked = FALSE, ",
    "worker_id = NULL, ",
    "updated_at = $3 ",
    "WHERE id = $1 AND status = 'processing' ",
    "RETURNING status",
);

/// `PostgreSQL`-backed job store.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: JobPgPool,
}

impl PostgresJobStore {
    /// Creates a new store from a `PostgreSQL` connection pool.
    #[must_use]
    pub const fn new(pool: JobPgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub const fn pool(&self) -> &JobPgPool {
        &self.pool
    }

    async fn run_blocking<F, T>(&self, f: F) -> JobStoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> JobStoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().map_err(JobStoreError::persistence)?;
            f(&mut connection)
        })
        .await
        .map_err(JobStoreError::persistence)?
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn initialize_schema(&self) -> JobStoreResult<()> {
        self.run_blocking(|connection| {
            connection
                .batch_execute(SCHEMA_SQL)
                .map_err(JobStoreError::persistence)
        })
        .await
    }

    async fn enqueue(&self, job: NewJob) -> JobStoreResult<JobId> {
        let new_row = NewJobRow::try_from_domain(&job)?;
        self.run_blocking(move |connection| {
            diesel::insert_into(job_queue::table)
                .values(&new_row)
                .returning(job_queue::id)
                .get_result::<i64>(connection)
                .map(JobId::new)
                .map_err(JobStoreError::persistence)
        })
        .await
    }

    async fn claim(&self, request: ClaimRequest) -> JobStoreResult<Option<Job>> {
        let ClaimRequest {
            worker_id,
            task_name,
            now,
        } = request;
        let task_filter = task_name.map(|name| name.as_str().to_owned());

        let claimed = self
            .run_blocking(move |connection| {
                connection
                    .transaction::<_, DieselError, _>(|tx| {
                        let candidate = diesel::sql_query(CLAIM_CANDIDATE_SQL)
                            .bind::<Timestamptz, _>(now)
                            .bind::<Nullable<Varchar>, _>(task_filter)
                            .get_result::<CandidateRow>(tx)
                            .optional()?;
                        let Some(CandidateRow { id }) = candidate else {
                            return Ok(None);
                        };

                        diesel::update(job_queue::table.find(id))
                            .set((
                                job_queue::status.eq(JobStatus::Processing.as_str()),
                                job_queue::locked.eq(true),
                                job_queue::worker_id.eq(Some(worker_id.as_str())),
                                job_queue::updated_at.eq(now),
                            ))
                            .returning(JobRow::as_returning())
                            .get_result::<JobRow>(tx)
                            .map(Some)
                    })
                    .map_err(JobStoreError::persistence)
            })
            .await?;

        // Decoding happens after commit: a corrupt payload is surfaced for
        // that job alone instead of rolling the claim back forever.
        claimed.map(row_to_job).transpose()
    }

    async fn report_success(&self, id: JobId, now: DateTime<Utc>) -> JobStoreResult<ReportOutcome> {
        self.run_blocking(move |connection| {
            let status = diesel::update(
                job_queue::table
                    .filter(job_queue::id.eq(id.value()))
                    .filter(job_queue::status.eq(JobStatus::Processing.as_str())),
            )
            .set((
                job_queue::status.eq(JobStatus::Success.as_str()),
                job_queue::locked.eq(false),
                job_queue::worker_id.eq(None::<String>),
                job_queue::is_active.eq(false),
                job_queue::updated_at.eq(now),
            ))
            .returning(job_queue::status)
            .get_result::<String>(connection)
            .optional()
            .map_err(JobStoreError::persistence)?;
            to_outcome(id, status.map(|status| StatusRow { status }))
        })
        .await
    }

    async fn report_failure(
        &self,
        id: JobId,
        retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> JobStoreResult<ReportOutcome> {
        let next_attempt_at = retry_at.unwrap_or(now);
        self.run_blocking(move |connection| {
            let row = diesel::sql_query(REPORT_FAILURE_SQL)
                .bind::<BigInt, _>(id.value())
                .bind::<Timestamptz, _>(next_attempt_at)
                .bind::<Timestamptz, _>(now)
                .get_result::<StatusRow>(connection)
                .optional()
                .map_err(JobStoreError::persistence)?;
            to_outcome(id, row)
        })
        .await
    }

    async fn report_error(
        &self,
        id: JobId,
        message: &str,
        now: DateTime<Utc>,
    ) -> JobStoreResult<ReportOutcome> {
        let error_message = message.to_owned();
        self.run_blocking(move |connection| {
            let status = diesel::update(
                job_queue::table
                    .filter(job_queue::id.eq(id.value()))
                    .filter(job_queue::status.eq(JobStatus::Processing.as_str())),
            )
            .set((
                job_queue::status.eq(JobStatus::Error.as_str()),
                job_queue::locked.eq(false),
                job_queue::worker_id.eq(None::<String>),
                job_queue::error_message.eq(Some(error_message)),
                job_queue::updated_at.eq(now),
            ))
            .returning(job_queue::status)
            .get_result::<String>(connection)
            .optional()
            .map_err(JobStoreError::persistence)?;
            to_outcome(id, status.map(|status| StatusRow { status }))
        })
        .await
    }

    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> JobStoreResult<usize> {
        self.run_blocking(move |connection| {
            diesel::update(
                job_queue::table
                    .filter(job_queue::status.eq(JobStatus::Processing.as_str()))
                    .filter(job_queue::locked.eq(true))
                    .filter(job_queue::updated_at.le(cutoff)),
            )
            .set((
                job_queue::status.eq(JobStatus::Pending.as_str()),
                job_queue::locked.eq(false),
                job_queue::worker_id.eq(None::<String>),
                job_queue::updated_at.eq(now),
            ))
            .execute(connection)
            .map_err(JobStoreError::persistence)
        })
        .await
    }

    async fn find_by_id(&self, id: JobId) -> JobStoreResult<Option<Job>> {
        self.run_blocking(move |connection| {
            let row = job_queue::table
                .filter(job_queue::id.eq(id.value()))
                .select(JobRow::as_select())
                .first::<JobRow>(connection)
                .optional()
                .map_err(JobStoreError::persistence)?;
            row.map(row_to_job).transpose()
        })
        .await
    }
}

fn to_outcome(id: JobId, row: Option<StatusRow>) -> JobStoreResult<ReportOutcome> {
    row.map_or(Ok(ReportOutcome::NoMatchingJob), |status_row| {
        parse_reported_status(id, status_row).map(ReportOutcome::Applied)
    })
}
