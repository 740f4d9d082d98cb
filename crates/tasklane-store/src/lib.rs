//! # Storage Boundary
//!
//! The task-store contract the engine consumes and the activity-log
//! persistence this subsystem owns.
//!
//! Reminder transitions are single-row conditional writes: multiple
//! scheduler instances can scan the same rows and exactly one wins each
//! pending-to-fired race, the others observe the advanced status and skip.
//! The in-memory and PostgreSQL implementations share these semantics so
//! tests exercise the same behavior that ships.

pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use memory::{InMemoryActivityStore, InMemoryTaskStore};
pub use postgres::PostgresStore;
pub use store::{ActivityStore, StoreError, TaskStore};
