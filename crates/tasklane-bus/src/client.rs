//! Bus client trait and publisher
//!
//! The broker contract is claim/ack/nack over partitioned, ordered logs:
//! a delivery stays in flight until acked or nacked, and while one delivery
//! for a partition key is in flight no further record for that key is
//! handed out. That single rule gives every consumer per-user ordering.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use tasklane_core::{Envelope, Topic};

use crate::retry::RetryPolicy;

/// Error type for bus operations
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The broker could not be reached within the retry budget
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    /// Ack/nack referenced a delivery the broker does not know
    #[error("unknown delivery: {0}")]
    UnknownDelivery(Uuid),

    /// Message body could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A record handed to a consumer group.
///
/// `attempt` counts deliveries of this record to this group, starting at 1.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: Uuid,
    pub partition_key: String,
    pub offset: u64,
    pub attempt: u32,
    pub published_at: DateTime<Utc>,
    pub body: String,
}

impl Delivery {
    /// Decode the message body. A failure here marks the record as poison:
    /// it will never decode on redelivery either.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        serde_json::from_str(&self.body).map_err(|e| BusError::Serialization(e.to_string()))
    }

    pub fn envelope(&self) -> Result<Envelope, BusError> {
        self.decode()
    }
}

/// Ordered, partitioned, durable log client.
///
/// Delivery is at-least-once: a claimed record that is nacked (or whose
/// consumer dies) is redelivered. Records sharing a partition key are
/// delivered to each group in publish order and never concurrently.
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    /// Append a record to a topic partition. Returning Ok means the broker
    /// has durably accepted the record.
    async fn publish_raw(&self, topic: Topic, key: &str, body: String) -> Result<(), BusError>;

    /// Claim up to `max` deliveries for a consumer group, at most one per
    /// partition key that has no delivery currently in flight.
    async fn claim(&self, topic: Topic, group: &str, max: usize)
        -> Result<Vec<Delivery>, BusError>;

    /// Acknowledge a delivery, advancing the group's cursor past it.
    async fn ack(&self, topic: Topic, group: &str, delivery_id: Uuid) -> Result<(), BusError>;

    /// Return a delivery for redelivery without advancing the cursor.
    async fn nack(&self, topic: Topic, group: &str, delivery_id: Uuid) -> Result<(), BusError>;
}

// ============================================================================
// Publisher
// ============================================================================

/// Typed publisher with a transient-failure retry budget.
///
/// Producers go through this wrapper rather than the raw bus so that a
/// flapping broker costs a bounded number of attempts before surfacing
/// `BusError::Unavailable` to the caller.
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn EventBus>,
    policy: RetryPolicy,
}

impl Publisher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            policy: RetryPolicy::publish(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Publish an envelope, partitioned by its owning user id.
    pub async fn publish(&self, topic: Topic, envelope: &Envelope) -> Result<(), BusError> {
        let key = envelope.partition_key().to_string();
        let body = serde_json::to_string(envelope)
            .map_err(|e| BusError::Serialization(e.to_string()))?;
        self.publish_with_retries(topic, &key, body).await
    }

    /// Publish an exhausted or poison event to the dead-letter topic.
    pub async fn publish_dead_letter(&self, letter: &DeadLetter) -> Result<(), BusError> {
        let key = letter.user_id.clone();
        let body = serde_json::to_string(letter)
            .map_err(|e| BusError::Serialization(e.to_string()))?;
        self.publish_with_retries(Topic::NotificationDlq, &key, body)
            .await
    }

    async fn publish_with_retries(
        &self,
        topic: Topic,
        key: &str,
        body: String,
    ) -> Result<(), BusError> {
        let mut attempt = 1;
        loop {
            match self.bus.publish_raw(topic, key, body.clone()).await {
                Ok(()) => return Ok(()),
                Err(BusError::Unavailable(reason)) => {
                    if !self.policy.has_attempts_remaining(attempt) {
                        return Err(BusError::Unavailable(reason));
                    }
                    warn!(
                        topic = %topic,
                        attempt,
                        %reason,
                        "publish failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.policy.delay_for_attempt(attempt)).await;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

// ============================================================================
// Dead Letters
// ============================================================================

/// Record published to the dead-letter topic when an event has exhausted
/// all retries or is unprocessable. Carries the full original event for
/// manual inspection and remediation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub original_topic: Topic,
    pub user_id: String,
    pub event: Envelope,
    pub error: String,
    pub attempts: u32,
    pub dead_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(original_topic: Topic, event: Envelope, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            original_topic,
            user_id: event.partition_key().to_string(),
            event,
            error: error.into(),
            attempts,
            dead_at: Utc::now(),
        }
    }
}
