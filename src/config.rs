//! Queue configuration.
//!
//! Values default to a `PostgreSQL` queue and may be overridden from the
//! environment. The in-memory store loses every job on exit and must be
//! selected explicitly.
//!
//! | Variable | Meaning |
//! | --- | --- |
//! | `JOBQUEUE_BACKEND` | `postgres` (default) or `memory` |
//! | `JOBQUEUE_DATABASE_URL` | connection string (falls back to `DATABASE_URL`) |
//! | `JOBQUEUE_POOL_SIZE` | maximum pooled connections |
//! | `JOBQUEUE_LOCK_LIFETIME_SECS` | stale-lock threshold in seconds, non-zero |
//! | `JOBQUEUE_POLL_INTERVAL_MS` | idle worker poll interval in milliseconds |
//! | `JOBQUEUE_INITIALIZE_SCHEMA` | `true` or `false` |

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::job::services::DEFAULT_LOCK_LIFETIME;

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    /// Process-local store; state is lost on exit.
    Memory,
    /// `PostgreSQL` store reached through a connection pool.
    #[default]
    Postgres,
}

impl StoreBackend {
    /// Returns `true` when jobs survive a process restart.
    #[must_use]
    pub const fn is_durable(self) -> bool {
        matches!(self, Self::Postgres)
    }
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "in_memory" => Ok(Self::Memory),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            other => Err(ConfigError::UnknownBackend(other.to_owned())),
        }
    }
}

/// Errors raised while reading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The backend name is not recognized.
    #[error("unknown job store backend: {0}")]
    UnknownBackend(String),
    /// A variable holds a value of the wrong shape.
    #[error("invalid value for {variable}: {value}")]
    InvalidValue {
        /// Variable name.
        variable: &'static str,
        /// Raw value.
        value: String,
    },
    /// The `PostgreSQL` backend was selected without a connection string.
    #[error("the postgres backend requires JOBQUEUE_DATABASE_URL or DATABASE_URL")]
    MissingDatabaseUrl,
}

/// Runtime settings for opening a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Storage backend.
    pub backend: StoreBackend,
    /// `PostgreSQL` connection string.
    pub database_url: Option<String>,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// Lock age after which a processing job is released.
    pub lock_lifetime: Duration,
    /// Pause between polls for an idle worker.
    pub poll_interval: Duration,
    /// Create the schema when the store is opened.
    pub initialize_schema: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Postgres,
            database_url: None,
            pool_size: 8,
            lock_lifetime: DEFAULT_LOCK_LIFETIME,
            poll_interval: Duration::from_secs(1),
            initialize_schema: true,
        }
    }
}

impl QueueConfig {
    /// Configuration for a process-local queue.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
            ..Self::default()
        }
    }

    /// Configuration for a `PostgreSQL` queue at `database_url`.
    #[must_use]
    pub fn postgres(database_url: impl Into<String>) -> Self {
        Self {
            backend: StoreBackend::Postgres,
            database_url: Some(database_url.into()),
            ..Self::default()
        }
    }

    /// Sets the maximum number of pooled connections.
    #[must_use]
    pub const fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Sets the stale-lock threshold.
    #[must_use]
    pub const fn with_lock_lifetime(mut self, lock_lifetime: Duration) -> Self {
        self.lock_lifetime = lock_lifetime;
        self
    }

    /// Sets the idle poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Reads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is malformed or zero where a
    /// positive value is required, or when the `PostgreSQL` backend (the
    /// default) lacks a connection string.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Errors
    ///
    /// As [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let backend = lookup("JOBQUEUE_BACKEND")
            .map(|value| value.parse::<StoreBackend>())
            .transpose()?
            .unwrap_or(defaults.backend);
        let database_url = lookup("JOBQUEUE_DATABASE_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .filter(|url| !url.trim().is_empty());
        let pool_size =
            parse_var(&lookup, "JOBQUEUE_POOL_SIZE")?.unwrap_or(defaults.pool_size);
        let lock_lifetime = parse_var(&lookup, "JOBQUEUE_LOCK_LIFETIME_SECS")?
            .map_or(defaults.lock_lifetime, Duration::from_secs);
        let poll_interval = parse_var(&lookup, "JOBQUEUE_POLL_INTERVAL_MS")?
            .map_or(defaults.poll_interval, Duration::from_millis);
        let initialize_schema = parse_var(&lookup, "JOBQUEUE_INITIALIZE_SCHEMA")?
            .unwrap_or(defaults.initialize_schema);

        if backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingDatabaseUrl);
        }
        if pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                variable: "JOBQUEUE_POOL_SIZE",
                value: pool_size.to_string(),
            });
        }
        // A zero lifetime would release every live lock on each sweep.
        if lock_lifetime.is_zero() {
            return Err(ConfigError::InvalidValue {
                variable: "JOBQUEUE_LOCK_LIFETIME_SECS",
                value: lock_lifetime.as_secs().to_string(),
            });
        }

        Ok(Self {
            backend,
            database_url,
            pool_size,
            lock_lifetime,
            poll_interval,
            initialize_schema,
        })
    }
}

fn parse_var<F, T>(lookup: &F, variable: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(variable)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidValue { variable, value })
        })
        .transpose()
}
