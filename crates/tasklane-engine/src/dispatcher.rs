//! Notification dispatcher
//!
//! Consumes reminder.due, renders a channel message, and drives the
//! delivery state machine:
//!
//! ```text
//! received -> delivering -> delivered
//!                        -> failed-retryable -> delivering (backoff)
//!                        -> failed-final     -> dead letter
//! ```
//!
//! Transient failures ride the consumer worker's redelivery schedule
//! (base 1 s, doubled, capped at 30 s, five attempts); exhaustion and
//! permanent failures dead-letter the original event, mark the reminder
//! failed, and publish notification.failed. The idempotency claim is taken
//! before delivery and released on the retry path so a redelivery may act
//! again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use tasklane_bus::{
    ConsumeError, Consumer, DeadLetter, Delivery, IdempotencyGuard, Publisher,
};
use tasklane_core::{
    envelope::SOURCE_NOTIFICATIONS, groups, Envelope, EventData, NotificationFailedData,
    NotificationSentData, ReminderDueData, ReminderStatus, Topic,
};
use tasklane_store::TaskStore;

use crate::channel::{DeliveryChannel, DeliveryOutcome, NotificationMessage};

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Timeout applied to each delivery-channel call
    pub delivery_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(10),
        }
    }
}

/// Consumes reminder.due and delivers notifications.
pub struct NotificationDispatcher {
    store: Arc<dyn TaskStore>,
    channel: Arc<dyn DeliveryChannel>,
    guard: Arc<IdempotencyGuard>,
    publisher: Publisher,
    config: DispatcherConfig,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn TaskStore>,
        channel: Arc<dyn DeliveryChannel>,
        guard: Arc<IdempotencyGuard>,
        publisher: Publisher,
    ) -> Self {
        Self {
            store,
            channel,
            guard,
            publisher,
            config: DispatcherConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    async fn deliver(&self, due: &ReminderDueData) -> Result<(), ConsumeError> {
        // The reminder may have been cancelled or already handled while the
        // event sat on the bus; stale states resolve as silent no-ops.
        let reminder = self
            .store
            .get_reminder(due.reminder_id)
            .await
            .map_err(|e| ConsumeError::Transient(e.to_string()))?;
        let Some(reminder) = reminder else {
            warn!(reminder_id = %due.reminder_id, "reminder not found, dropping event");
            return Ok(());
        };
        if !matches!(reminder.status, ReminderStatus::Fired | ReminderStatus::Pending) {
            debug!(
                reminder_id = %reminder.id,
                status = %reminder.status,
                "reminder no longer deliverable, skipping"
            );
            return Ok(());
        }

        let message = NotificationMessage::for_reminder(due);
        let outcome = match tokio::time::timeout(
            self.config.delivery_timeout,
            self.channel.deliver(&message),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => DeliveryOutcome::Retryable(format!(
                "delivery timed out after {:?}",
                self.config.delivery_timeout
            )),
        };

        match outcome {
            DeliveryOutcome::Delivered => {
                self.store
                    .mark_reminder_sent(reminder.id)
                    .await
                    .map_err(|e| ConsumeError::Transient(e.to_string()))?;

                let sent = Envelope::new(
                    SOURCE_NOTIFICATIONS,
                    NotificationSentData {
                        notification_id: message.notification_id,
                        reminder_id: reminder.id,
                        task_id: due.task_id,
                        user_id: due.user_id.clone(),
                        channel: message.channel.clone(),
                    },
                );
                if let Err(e) = self.publisher.publish(Topic::NotificationSend, &sent).await {
                    // Delivery happened; losing the outcome event is
                    // bounded harm, re-running delivery is not.
                    error!(reminder_id = %reminder.id, error = %e, "failed to publish notification.sent");
                }

                info!(
                    reminder_id = %reminder.id,
                    user_id = %due.user_id,
                    channel = %message.channel,
                    "notification delivered"
                );
                Ok(())
            }
            DeliveryOutcome::Retryable(reason) => {
                debug!(reminder_id = %reminder.id, %reason, "delivery failed, will retry");
                Err(ConsumeError::Transient(reason))
            }
            DeliveryOutcome::Permanent(reason) => {
                warn!(reminder_id = %reminder.id, %reason, "delivery failed permanently");
                Err(ConsumeError::Poison(reason))
            }
        }
    }

    /// Dead-letter an event that will never be delivered, marking the
    /// reminder failed and publishing the failure outcome.
    async fn dead_letter(&self, envelope: Envelope, due: &ReminderDueData, error: &str, attempts: u32) {
        let reminder_id = due.reminder_id;

        if let Err(e) = self.store.mark_reminder_failed(reminder_id, error).await {
            error!(%reminder_id, error = %e, "failed to mark reminder failed");
        }

        let failed = Envelope::new(
            SOURCE_NOTIFICATIONS,
            NotificationFailedData {
                notification_id: uuid::Uuid::new_v4(),
                reminder_id,
                task_id: due.task_id,
                user_id: due.user_id.clone(),
                channel: due.delivery_channel.clone(),
                error: error.to_string(),
                attempts,
            },
        );
        if let Err(e) = self
            .publisher
            .publish(Topic::NotificationSend, &failed)
            .await
        {
            error!(%reminder_id, error = %e, "failed to publish notification.failed");
        }

        let letter = DeadLetter::new(Topic::ReminderDue, envelope, error, attempts);
        if let Err(e) = self.publisher.publish_dead_letter(&letter).await {
            error!(%reminder_id, error = %e, "failed to publish dead letter");
        }

        warn!(%reminder_id, attempts, "reminder dead-lettered");
    }
}

#[async_trait]
impl Consumer for NotificationDispatcher {
    fn group(&self) -> &str {
        groups::NOTIFICATION_DELIVERY
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), ConsumeError> {
        let envelope = delivery
            .envelope()
            .map_err(|e| ConsumeError::Poison(e.to_string()))?;
        let EventData::ReminderDue(due) = &envelope.data else {
            // Only reminder.due belongs on this topic; anything else is
            // unprocessable.
            return Err(ConsumeError::Poison(format!(
                "unexpected event type {} on reminder.due",
                envelope.event_type
            )));
        };

        if !self
            .guard
            .claim(self.group(), envelope.id)
            .await
            .map_err(|e| ConsumeError::Transient(e.to_string()))?
        {
            return Ok(());
        }

        let result = self.deliver(due).await;
        if matches!(result, Err(ConsumeError::Transient(_))) {
            // Give the redelivery a chance to act.
            if let Err(e) = self.guard.release(self.group(), envelope.id).await {
                warn!(event_id = %envelope.id, error = %e, "failed to release idempotency claim");
            }
        }
        result
    }

    async fn on_exhausted(&self, delivery: &Delivery, error: &ConsumeError) {
        let Ok(envelope) = delivery.envelope() else {
            error!(
                partition_key = %delivery.partition_key,
                offset = delivery.offset,
                "undecodable event abandoned on reminder.due"
            );
            return;
        };
        if let EventData::ReminderDue(due) = envelope.data.clone() {
            // Seal the claim: the failure is this event's final outcome.
            let _ = self.guard.claim(self.group(), envelope.id).await;
            self.dead_letter(envelope, &due, &error.to_string(), delivery.attempt)
                .await;
        }
    }
}

// ============================================================================
// Reminder cancellation
// ============================================================================

/// The dispatcher's second subscription: watches task lifecycle events and
/// cancels the pending reminder when its task completes or is deleted
/// before firing. Best-effort: a reminder that already fired stays fired,
/// and a duplicate or late notification is accepted rather than treated as
/// an error.
pub struct ReminderCancellation {
    store: Arc<dyn TaskStore>,
}

impl ReminderCancellation {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Consumer for ReminderCancellation {
    fn group(&self) -> &str {
        groups::NOTIFICATION_DELIVERY
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), ConsumeError> {
        let envelope = delivery
            .envelope()
            .map_err(|e| ConsumeError::Poison(e.to_string()))?;

        let task_id = match &envelope.data {
            EventData::TaskCompleted(data) => data.task_id,
            EventData::TaskDeleted(data) => data.task_id,
            _ => return Ok(()),
        };

        let cancelled = self
            .store
            .cancel_pending_reminder(task_id)
            .await
            .map_err(|e| ConsumeError::Transient(e.to_string()))?;
        if cancelled {
            info!(%task_id, event_type = %envelope.event_type, "cancelled pending reminder");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use chrono::Utc;
    use tasklane_bus::{EventBus, InMemoryBus, InMemoryKeyValueStore, RetryPolicy};
    use tasklane_core::{Task, TaskCompletedData, TaskPriority};
    use tasklane_store::{InMemoryTaskStore, TaskStore};
    use uuid::Uuid;

    struct Fixture {
        bus: Arc<InMemoryBus>,
        store: Arc<InMemoryTaskStore>,
        guard: Arc<IdempotencyGuard>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                bus: Arc::new(InMemoryBus::new()),
                store: Arc::new(InMemoryTaskStore::new()),
                guard: Arc::new(IdempotencyGuard::new(Arc::new(InMemoryKeyValueStore::new()))),
            }
        }

        fn dispatcher(&self, channel: Arc<dyn DeliveryChannel>) -> NotificationDispatcher {
            NotificationDispatcher::new(
                self.store.clone(),
                channel,
                self.guard.clone(),
                Publisher::new(self.bus.clone())
                    .with_policy(RetryPolicy::fixed(Duration::from_millis(1), 2)),
            )
            .with_config(DispatcherConfig {
                delivery_timeout: Duration::from_millis(500),
            })
        }

        async fn fired_reminder(&self) -> (Task, tasklane_core::Reminder) {
            let task = Task {
                id: Uuid::new_v4(),
                user_id: "user-1".to_string(),
                title: "submit expenses".to_string(),
                description: String::new(),
                due_date: Some(Utc::now() + chrono::Duration::minutes(5)),
                priority: TaskPriority::Medium,
                is_complete: false,
                tags: vec![],
                recurrence_id: None,
                parent_task_id: None,
                reminder_offset_minutes: Some(1),
                created_at: Utc::now(),
            };
            self.store.insert_task(task.clone());
            let reminder = self
                .store
                .schedule_reminder(&task, "in-app")
                .await
                .unwrap()
                .unwrap();
            self.store
                .transition_reminder(reminder.id, ReminderStatus::Pending, ReminderStatus::Fired)
                .await
                .unwrap();
            (task, reminder)
        }

        fn due_delivery(&self, task: &Task, reminder: &tasklane_core::Reminder, attempt: u32) -> (Envelope, Delivery) {
            let envelope = Envelope::new(
                tasklane_core::envelope::SOURCE_SCHEDULER,
                ReminderDueData {
                    reminder_id: reminder.id,
                    task_id: task.id,
                    user_id: task.user_id.clone(),
                    task_title: task.title.clone(),
                    task_due_date: task.due_date.unwrap(),
                    delivery_channel: reminder.delivery_channel.clone(),
                    attempt,
                },
            );
            let delivery = Delivery {
                id: Uuid::new_v4(),
                partition_key: task.user_id.clone(),
                offset: 0,
                attempt,
                published_at: Utc::now(),
                body: serde_json::to_string(&envelope).unwrap(),
            };
            (envelope, delivery)
        }

        async fn drain_outcomes(&self) -> Vec<Envelope> {
            let mut outcomes = vec![];
            loop {
                let claims = self
                    .bus
                    .claim(Topic::NotificationSend, "probe", 16)
                    .await
                    .unwrap();
                if claims.is_empty() {
                    break;
                }
                for delivery in claims {
                    outcomes.push(delivery.envelope().unwrap());
                    self.bus
                        .ack(Topic::NotificationSend, "probe", delivery.id)
                        .await
                        .unwrap();
                }
            }
            outcomes
        }
    }

    #[tokio::test]
    async fn test_successful_delivery_marks_sent() {
        let fixture = Fixture::new();
        let channel = Arc::new(MockChannel::always_delivers());
        let dispatcher = fixture.dispatcher(channel.clone());
        let (task, reminder) = fixture.fired_reminder().await;
        let (_, delivery) = fixture.due_delivery(&task, &reminder, 1);

        dispatcher.handle(&delivery).await.unwrap();

        let reminder = fixture.store.get_reminder(reminder.id).await.unwrap().unwrap();
        assert_eq!(reminder.status, ReminderStatus::Sent);
        assert!(reminder.sent_at.is_some());

        let outcomes = fixture.drain_outcomes().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].event_type, "notification.sent");
    }

    #[tokio::test]
    async fn test_duplicate_event_delivers_once() {
        let fixture = Fixture::new();
        let channel = Arc::new(MockChannel::always_delivers());
        let dispatcher = fixture.dispatcher(channel.clone());
        let (task, reminder) = fixture.fired_reminder().await;
        let (envelope, delivery) = fixture.due_delivery(&task, &reminder, 1);

        dispatcher.handle(&delivery).await.unwrap();

        // Same envelope id redelivered.
        let duplicate = Delivery {
            id: Uuid::new_v4(),
            body: serde_json::to_string(&envelope).unwrap(),
            ..delivery.clone()
        };
        dispatcher.handle(&duplicate).await.unwrap();

        assert_eq!(channel.attempt_count(), 1);
    }

    #[tokio::test]
    async fn test_retryable_failure_releases_claim() {
        let fixture = Fixture::new();
        let channel = Arc::new(MockChannel::scripted(vec![
            DeliveryOutcome::Retryable("down".to_string()),
            DeliveryOutcome::Delivered,
        ]));
        let dispatcher = fixture.dispatcher(channel.clone());
        let (task, reminder) = fixture.fired_reminder().await;
        let (_, delivery) = fixture.due_delivery(&task, &reminder, 1);

        let err = dispatcher.handle(&delivery).await.unwrap_err();
        assert!(matches!(err, ConsumeError::Transient(_)));

        // Redelivery re-claims and succeeds.
        let retry = Delivery {
            id: Uuid::new_v4(),
            attempt: 2,
            ..delivery.clone()
        };
        dispatcher.handle(&retry).await.unwrap();

        assert_eq!(channel.attempt_count(), 2);
        let reminder = fixture.store.get_reminder(reminder.id).await.unwrap().unwrap();
        assert_eq!(reminder.status, ReminderStatus::Sent);
    }

    #[tokio::test]
    async fn test_exhaustion_dead_letters_once() {
        let fixture = Fixture::new();
        let channel = Arc::new(MockChannel::scripted(vec![DeliveryOutcome::Retryable(
            "still down".to_string(),
        )]));
        let dispatcher = fixture.dispatcher(channel.clone());
        let (task, reminder) = fixture.fired_reminder().await;
        let (_, delivery) = fixture.due_delivery(&task, &reminder, 5);

        let err = dispatcher.handle(&delivery).await.unwrap_err();
        dispatcher.on_exhausted(&delivery, &err).await;

        let reminder = fixture.store.get_reminder(reminder.id).await.unwrap().unwrap();
        assert_eq!(reminder.status, ReminderStatus::Failed);
        assert_eq!(reminder.error_message.as_deref(), Some("transient failure: still down"));

        // Exactly one dead letter.
        let letters = fixture
            .bus
            .claim(Topic::NotificationDlq, "probe", 16)
            .await
            .unwrap();
        assert_eq!(letters.len(), 1);
        let letter: DeadLetter = letters[0].decode().unwrap();
        assert_eq!(letter.original_topic, Topic::ReminderDue);
        assert_eq!(letter.attempts, 5);

        // And a notification.failed outcome.
        let outcomes = fixture.drain_outcomes().await;
        assert!(outcomes.iter().any(|e| e.event_type == "notification.failed"));
    }

    #[tokio::test]
    async fn test_cancelled_reminder_is_noop() {
        let fixture = Fixture::new();
        let channel = Arc::new(MockChannel::always_delivers());
        let dispatcher = fixture.dispatcher(channel.clone());
        let (task, reminder) = fixture.fired_reminder().await;
        fixture
            .store
            .transition_reminder(reminder.id, ReminderStatus::Fired, ReminderStatus::Cancelled)
            .await
            .unwrap();
        let (_, delivery) = fixture.due_delivery(&task, &reminder, 1);

        dispatcher.handle(&delivery).await.unwrap();

        assert_eq!(channel.attempt_count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_consumer_cancels_pending() {
        let fixture = Fixture::new();
        let cancellation = ReminderCancellation::new(fixture.store.clone());

        let task = Task {
            id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            title: "water plants".to_string(),
            description: String::new(),
            due_date: Some(Utc::now() + chrono::Duration::hours(2)),
            priority: TaskPriority::Low,
            is_complete: false,
            tags: vec![],
            recurrence_id: None,
            parent_task_id: None,
            reminder_offset_minutes: Some(10),
            created_at: Utc::now(),
        };
        fixture.store.insert_task(task.clone());
        let reminder = fixture
            .store
            .schedule_reminder(&task, "in-app")
            .await
            .unwrap()
            .unwrap();

        let envelope = Envelope::new(
            tasklane_core::envelope::SOURCE_TASKS,
            TaskCompletedData {
                task_id: task.id,
                user_id: task.user_id.clone(),
                title: task.title.clone(),
                due_date: task.due_date,
                priority: task.priority,
                tags: vec![],
                recurrence_id: None,
                parent_task_id: None,
            },
        );
        let delivery = Delivery {
            id: Uuid::new_v4(),
            partition_key: task.user_id.clone(),
            offset: 0,
            attempt: 1,
            published_at: Utc::now(),
            body: serde_json::to_string(&envelope).unwrap(),
        };

        cancellation.handle(&delivery).await.unwrap();

        let reminder = fixture.store.get_reminder(reminder.id).await.unwrap().unwrap();
        assert_eq!(reminder.status, ReminderStatus::Cancelled);
    }
}
