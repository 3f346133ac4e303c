//! `PostgreSQL` adapters for job queue persistence.

mod models;
mod schema;
mod store;

pub use store::{JobPgPool, PostgresJobStore};
