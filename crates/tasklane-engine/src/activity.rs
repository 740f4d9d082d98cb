//! Activity log consumer
//!
//! Writes one audit entry per processed event. The claim happens before the
//! append; an append failure releases the claim and the redelivery writes
//! the entry, so the log ends up with exactly one entry per source event.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use tasklane_bus::{ConsumeError, Consumer, Delivery, IdempotencyGuard};
use tasklane_core::{groups, ActivityLogEntry};
use tasklane_store::ActivityStore;

/// Consumes lifecycle events into the append-only audit trail.
pub struct ActivityLogConsumer {
    store: Arc<dyn ActivityStore>,
    guard: Arc<IdempotencyGuard>,
}

impl ActivityLogConsumer {
    pub fn new(store: Arc<dyn ActivityStore>, guard: Arc<IdempotencyGuard>) -> Self {
        Self { store, guard }
    }
}

#[async_trait]
impl Consumer for ActivityLogConsumer {
    fn group(&self) -> &str {
        groups::ACTIVITY_SERVICE
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), ConsumeError> {
        let envelope = delivery
            .envelope()
            .map_err(|e| ConsumeError::Poison(e.to_string()))?;

        if !self
            .guard
            .claim(self.group(), envelope.id)
            .await
            .map_err(|e| ConsumeError::Transient(e.to_string()))?
        {
            return Ok(());
        }

        let entry = ActivityLogEntry::from_envelope(&envelope);
        debug!(
            event_type = %entry.event_type,
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            "recording activity"
        );

        if let Err(e) = self.store.append(entry).await {
            // Unclaim so the redelivery writes the entry.
            if let Err(release_err) = self.guard.release(self.group(), envelope.id).await {
                warn!(event_id = %envelope.id, error = %release_err, "failed to release idempotency claim");
            }
            return Err(ConsumeError::Transient(e.to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tasklane_bus::InMemoryKeyValueStore;
    use tasklane_core::{
        envelope::SOURCE_TASKS, ActivityFilter, Envelope, TaskDeletedData,
    };
    use tasklane_store::InMemoryActivityStore;
    use uuid::Uuid;

    fn consumer() -> (Arc<InMemoryActivityStore>, ActivityLogConsumer) {
        let store = Arc::new(InMemoryActivityStore::new());
        let guard = Arc::new(IdempotencyGuard::new(Arc::new(InMemoryKeyValueStore::new())));
        (store.clone(), ActivityLogConsumer::new(store, guard))
    }

    fn delivery(envelope: &Envelope, attempt: u32) -> Delivery {
        Delivery {
            id: Uuid::new_v4(),
            partition_key: envelope.partition_key().to_string(),
            offset: 0,
            attempt,
            published_at: Utc::now(),
            body: serde_json::to_string(envelope).unwrap(),
        }
    }

    fn deleted_event() -> Envelope {
        Envelope::new(
            SOURCE_TASKS,
            TaskDeletedData {
                task_id: Uuid::new_v4(),
                user_id: "user-1".to_string(),
                title: "stale".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_one_entry_per_event() {
        let (store, consumer) = consumer();
        let envelope = deleted_event();

        consumer.handle(&delivery(&envelope, 1)).await.unwrap();
        consumer.handle(&delivery(&envelope, 2)).await.unwrap();

        assert_eq!(store.len(), 1);
        let page = store
            .query(&ActivityFilter::for_user("user-1"), 1, 10)
            .await
            .unwrap();
        assert_eq!(page.total_items, 1);
        assert_eq!(page.entries[0].event_type, "task.deleted");
    }

    #[tokio::test]
    async fn test_undecodable_body_is_poison() {
        let (store, consumer) = consumer();
        let bad = Delivery {
            id: Uuid::new_v4(),
            partition_key: "user-1".to_string(),
            offset: 0,
            attempt: 1,
            published_at: Utc::now(),
            body: "not json".to_string(),
        };

        let err = consumer.handle(&bad).await.unwrap_err();
        assert!(matches!(err, ConsumeError::Poison(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_events_each_logged() {
        let (store, consumer) = consumer();

        for _ in 0..3 {
            consumer.handle(&delivery(&deleted_event(), 1)).await.unwrap();
        }

        assert_eq!(store.len(), 3);
    }
}
