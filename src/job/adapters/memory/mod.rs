//! In-memory adapters for embedding and tests.

mod store;

pub use store::InMemoryJobStore;
