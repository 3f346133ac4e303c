//! Runs the stale-lock reaper against the configured job store.
//!
//! Usage:
//!
//! ```text
//! DATABASE_URL=postgres://... jobqueue_reaper [interval-secs]
//! ```
//!
//! The reaper only runs against a durable backend; a process-local store
//! would hold no jobs but its own.
//!
//! Jobs locked for longer than `JOBQUEUE_LOCK_LIFETIME_SECS` are returned to
//! `pending` every `interval-secs` seconds (default 60) until the process
//! receives Ctrl-C.

use jobqueue::config::{ConfigError, QueueConfig, StoreBackend};
use jobqueue::job::services::{JobQueueError, StaleLockReaper};
use jobqueue::setup::{SetupError, open_queue};
use jobqueue::telemetry::init_tracing;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const DEFAULT_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Error)]
enum ReaperError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("the {0:?} backend is not durable; select a shared database backend")]
    NonDurableBackend(StoreBackend),
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Queue(#[from] JobQueueError),
    #[error("failed to wait for shutdown signal: {0}")]
    Signal(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), ReaperError> {
    init_tracing();
    let interval = parse_interval(std::env::args().skip(1))?;
    let config = durable(QueueConfig::from_env()?)?;
    let queue = open_queue(&config).await?;

    let handle = StaleLockReaper::new(queue)
        .with_interval(interval)
        .spawn()?;
    tokio::signal::ctrl_c().await?;
    info!("shutting down stale lock reaper");
    handle.stop().await;
    Ok(())
}

fn durable(config: QueueConfig) -> Result<QueueConfig, ReaperError> {
    if config.backend.is_durable() {
        Ok(config)
    } else {
        Err(ReaperError::NonDurableBackend(config.backend))
    }
}

fn parse_interval(mut args: impl Iterator<Item = String>) -> Result<Duration, ReaperError> {
    let seconds = match (args.next(), args.next()) {
        (None, _) => DEFAULT_INTERVAL_SECS,
        (Some(raw), None) => raw
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| ReaperError::InvalidArgs(format!("bad interval: {raw}")))?,
        (Some(_), Some(_)) => {
            return Err(ReaperError::InvalidArgs(
                "expected at most one argument".to_owned(),
            ));
        }
    };
    Ok(Duration::from_secs(seconds))
}
