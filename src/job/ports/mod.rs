//! Port contracts for job persistence.
//!
//! Ports define backend-agnostic interfaces used by the queue services.

pub mod store;

pub use store::{ClaimRequest, JobStore, JobStoreError, JobStoreResult, ReportOutcome};
