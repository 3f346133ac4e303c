//! Jobqueue: a durable, SQL-backed job queue.
//!
//! Producers enqueue named tasks with a JSON payload, a priority, and an
//! optional schedule. Workers claim the next eligible job atomically, process
//! it, and report success, a retryable failure, or a fatal error. Jobs
//! abandoned by crashed workers are returned to the queue by the stale-lock
//! reaper.
//!
//! # Architecture
//!
//! The queue follows hexagonal architecture principles:
//!
//! - **Domain**: the job entity and its status state machine
//! - **Ports**: the [`job::ports::JobStore`] capability contract
//! - **Adapters**: in-memory and `PostgreSQL` stores
//! - **Services**: the queue handle, worker loop, and reaper
//!
//! # Modules
//!
//! - [`job`]: queue domain, storage, and services
//! - [`config`]: runtime configuration
//! - [`setup`]: store construction from configuration
//! - [`telemetry`]: tracing initialization

pub mod config;
pub mod job;
pub mod setup;
pub mod telemetry;
