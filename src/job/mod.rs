//! Durable job queue: lifecycle state machine, claim protocol, outcome
//! reporting, and stale-lock recovery.
//!
//! The module follows hexagonal architecture:
//!
//! - Domain types and the status state machine in [`domain`]
//! - The storage capability contract in [`ports`]
//! - Backend implementations in [`adapters`]
//! - Queue, worker, and reaper orchestration in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
