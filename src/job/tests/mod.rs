//! Unit tests for the job module.
//!
//! Tests are organised by layer: the domain state machine, the in-memory
//! store, the queue service, and the worker loop.
