//! Idempotency guard
//!
//! At-least-once delivery means every consumer sees duplicates. The guard
//! turns that into effectively-once side effects: a consumer claims the
//! event id before acting, and a second delivery finds the claim and skips.
//! Claims expire after a window at least as long as the bus retains
//! records, so storage stays bounded while every possible redelivery is
//! still covered.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use tasklane_core::Topic;

/// Error type for key-value store operations
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
}

/// Minimal contract the guard needs from its backing store: single-key
/// atomic set-if-absent with TTL, and delete. Redis SET NX PX satisfies it;
/// so does the in-memory implementation below.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Atomically record `key` unless it already exists. Returns true when
    /// the key was newly set, false when it was already present.
    async fn set_nx(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    async fn delete(&self, key: &str) -> Result<(), KvError>;
}

/// In-memory key-value store with lazy expiry.
pub struct InMemoryKeyValueStore {
    entries: DashMap<String, DateTime<Utc>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn set_nx(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36500));

        // The entry API holds the shard lock, making check-and-set atomic.
        let mut claimed = false;
        self.entries
            .entry(key.to_string())
            .and_modify(|existing| {
                if *existing <= now {
                    *existing = expires_at;
                    claimed = true;
                }
            })
            .or_insert_with(|| {
                claimed = true;
                expires_at
            });
        Ok(claimed)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.entries.remove(key);
        Ok(())
    }
}

// ============================================================================
// Idempotency Guard
// ============================================================================

/// Claim-before-act deduplication, scoped per logical consumer.
///
/// Scoping claims by consumer name keeps the consumers independent: the
/// activity logger claiming an event never blocks the recurrence engine
/// from processing the same event id.
pub struct IdempotencyGuard {
    store: std::sync::Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl IdempotencyGuard {
    /// Default TTL covers the longest topic retention, so no redelivery can
    /// outlive its claim.
    pub fn new(store: std::sync::Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            ttl: Topic::max_retention(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Claim an event id for a consumer. Returns false when the event was
    /// already claimed, in which case the caller must skip its side effect.
    /// A collision is an expected outcome of at-least-once delivery, never
    /// an error.
    pub async fn claim(&self, consumer: &str, event_id: Uuid) -> Result<bool, KvError> {
        let claimed = self.store.set_nx(&claim_key(consumer, event_id), self.ttl).await?;
        if !claimed {
            debug!(consumer, %event_id, "event already claimed, skipping");
        }
        Ok(claimed)
    }

    /// Release a claim after a failed side effect, so the bus redelivery
    /// gets another chance to act.
    pub async fn release(&self, consumer: &str, event_id: Uuid) -> Result<(), KvError> {
        self.store.delete(&claim_key(consumer, event_id)).await
    }
}

fn claim_key(consumer: &str, event_id: Uuid) -> String {
    format!("idempotency:{consumer}:{event_id}")
}
