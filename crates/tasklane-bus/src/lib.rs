//! # Event Bus Client
//!
//! Typed publish/subscribe over an ordered, partitioned, durable log.
//!
//! ## Delivery model
//!
//! - **At-least-once**: a claimed record that is nacked or abandoned is
//!   redelivered until acknowledged.
//! - **Per-partition ordering**: records sharing a partition key (always
//!   the owning user id) reach each consumer group in publish order, and
//!   never concurrently.
//! - **Effectively-once side effects**: consumers pair redelivery with the
//!   [`IdempotencyGuard`]: claim the event id before acting, skip when the
//!   claim already exists.
//!
//! ```text
//! ┌────────────┐  publish   ┌──────────────────┐  claim/ack  ┌────────────────┐
//! │ Publisher  │──────────▶│ EventBus (broker) │◀───────────│ ConsumerWorker │
//! │ (retries)  │            │ partitioned logs  │             │ (handler pool) │
//! └────────────┘            └──────────────────┘             └────────────────┘
//! ```

pub mod client;
pub mod consumer;
pub mod idempotency;
pub mod memory;
pub mod retry;

pub use client::{BusError, DeadLetter, Delivery, EventBus, Publisher};
pub use consumer::{ConsumeError, Consumer, ConsumerConfig, ConsumerWorker};
pub use idempotency::{IdempotencyGuard, InMemoryKeyValueStore, KeyValueStore, KvError};
pub use memory::InMemoryBus;
pub use retry::RetryPolicy;
