//! Construction of stores and queue handles from [`QueueConfig`].

use crate::config::{QueueConfig, StoreBackend};
use crate::job::{
    adapters::{
        memory::InMemoryJobStore,
        postgres::{JobPgPool, PostgresJobStore},
    },
    ports::{JobStore, JobStoreError},
    services::{JobHandler, JobQueueService, Worker},
};
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PoolError};
use mockable::DefaultClock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while opening a queue.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The `PostgreSQL` backend was selected without a connection string.
    #[error("the postgres backend requires a database URL")]
    MissingDatabaseUrl,
    /// The connection pool could not be built.
    #[error("failed to build connection pool: {0}")]
    Pool(#[from] PoolError),
    /// Schema initialization failed.
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Builds a `PostgreSQL` connection pool.
///
/// # Errors
///
/// Returns [`SetupError::Pool`] when no connection can be established.
pub fn build_pool(database_url: &str, pool_size: u32) -> Result<JobPgPool, SetupError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Ok(Pool::builder().max_size(pool_size).build(manager)?)
}

/// Opens the store selected by `config`, creating its schema when
/// `config.initialize_schema` is set.
///
/// # Errors
///
/// Returns [`SetupError`] when the pool cannot be built or schema creation
/// fails.
pub async fn open_store(config: &QueueConfig) -> Result<Arc<dyn JobStore>, SetupError> {
    let store: Arc<dyn JobStore> = match config.backend {
        StoreBackend::Memory => {
            warn!("in-memory job store selected; jobs are lost when the process exits");
            Arc::new(InMemoryJobStore::new())
        }
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .clone()
                .ok_or(SetupError::MissingDatabaseUrl)?;
            let pool_size = config.pool_size;
            let pool = tokio::task::spawn_blocking(move || build_pool(&url, pool_size))
                .await
                .map_err(JobStoreError::persistence)??;
            Arc::new(PostgresJobStore::new(pool))
        }
    };

    if config.initialize_schema {
        store.initialize_schema().await?;
    }
    info!(backend = ?config.backend, "job store opened");
    Ok(store)
}

/// Opens a queue handle on the store selected by `config`, using the system
/// clock.
///
/// # Errors
///
/// As [`open_store`].
pub async fn open_queue(
    config: &QueueConfig,
) -> Result<JobQueueService<dyn JobStore, DefaultClock>, SetupError> {
    let store = open_store(config).await?;
    Ok(JobQueueService::new(store, Arc::new(DefaultClock)).with_lock_lifetime(config.lock_lifetime))
}

/// Opens a queue as [`open_queue`] does and returns a worker on it that
/// polls at `config.poll_interval`.
///
/// # Errors
///
/// As [`open_store`].
pub async fn open_worker<H>(
    config: &QueueConfig,
    handler: Arc<H>,
) -> Result<Worker<dyn JobStore, DefaultClock, H>, SetupError>
where
    H: JobHandler + ?Sized,
{
    let queue = open_queue(config).await?;
    Ok(Worker::new(&queue, handler).with_poll_interval(config.poll_interval))
}
