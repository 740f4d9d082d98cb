//! Recurrence engine
//!
//! Consumes task.completed events and materializes the next occurrence of
//! recurring tasks. The event id is claimed before the new instance is
//! created, so a redelivered completion never produces a duplicate; a
//! creation failure releases the claim and rides the bus redelivery
//! schedule. When the pattern's end date has passed the chain stops
//! silently.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use tasklane_bus::{ConsumeError, Consumer, DeadLetter, Delivery, IdempotencyGuard, Publisher};
use tasklane_core::{
    envelope::SOURCE_RECURRENCE, groups, Envelope, EventData, NewTask, Task, TaskCompletedData,
    TaskCreatedData, Topic,
};
use tasklane_store::TaskStore;

/// Consumes task.completed and creates the next occurrence.
pub struct RecurrenceEngine {
    store: Arc<dyn TaskStore>,
    guard: Arc<IdempotencyGuard>,
    publisher: Publisher,
}

impl RecurrenceEngine {
    pub fn new(store: Arc<dyn TaskStore>, guard: Arc<IdempotencyGuard>, publisher: Publisher) -> Self {
        Self {
            store,
            guard,
            publisher,
        }
    }

    async fn generate_next(
        &self,
        envelope: &Envelope,
        completed: &TaskCompletedData,
    ) -> Result<(), ConsumeError> {
        let Some(recurrence_id) = completed.recurrence_id else {
            return Ok(());
        };

        let pattern = self
            .store
            .get_recurrence_pattern(recurrence_id)
            .await
            .map_err(|e| ConsumeError::Transient(e.to_string()))?;
        let Some(pattern) = pattern else {
            warn!(%recurrence_id, task_id = %completed.task_id, "recurrence pattern not found");
            return Ok(());
        };

        let anchor = completed.due_date.unwrap_or(envelope.time);
        let Some(next_due) = pattern.next_occurrence(anchor) else {
            // The pattern has run its course; ending is not an error.
            debug!(task_id = %completed.task_id, "recurrence ended, no next occurrence");
            return Ok(());
        };

        // Prefer the full task for inherited fields; fall back to the event
        // payload when the task-store no longer has the row.
        let completed_task = self
            .store
            .get_task(completed.task_id)
            .await
            .map_err(|e| ConsumeError::Transient(e.to_string()))?;
        let fields = match completed_task {
            Some(task) => NewTask::next_occurrence_of(&task, next_due),
            None => NewTask {
                user_id: completed.user_id.clone(),
                title: completed.title.clone(),
                description: String::new(),
                due_date: Some(next_due),
                priority: completed.priority,
                tags: completed.tags.clone(),
                recurrence_id: Some(recurrence_id),
                parent_task_id: Some(completed.parent_task_id.unwrap_or(completed.task_id)),
                reminder_offset_minutes: None,
            },
        };

        let new_task = self
            .store
            .create_task(fields)
            .await
            .map_err(|e| ConsumeError::Transient(e.to_string()))?;

        info!(
            completed_task_id = %completed.task_id,
            new_task_id = %new_task.id,
            due_date = %next_due,
            "generated next occurrence"
        );

        let created = Envelope::new(SOURCE_RECURRENCE, created_data(&new_task));
        if let Err(e) = self.publisher.publish(Topic::TaskEvents, &created).await {
            // The instance exists; re-creating it on redelivery would be
            // worse than a missing announcement.
            error!(task_id = %new_task.id, error = %e, "failed to publish task.created");
        }

        Ok(())
    }
}

fn created_data(task: &Task) -> TaskCreatedData {
    TaskCreatedData {
        task_id: task.id,
        user_id: task.user_id.clone(),
        title: task.title.clone(),
        description: task.description.clone(),
        due_date: task.due_date,
        priority: task.priority,
        is_complete: false,
        tags: task.tags.clone(),
        recurrence_id: task.recurrence_id,
        parent_task_id: task.parent_task_id,
        reminder_offset_minutes: task.reminder_offset_minutes,
    }
}

#[async_trait]
impl Consumer for RecurrenceEngine {
    fn group(&self) -> &str {
        groups::RECURRENCE_SERVICE
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), ConsumeError> {
        let envelope = delivery
            .envelope()
            .map_err(|e| ConsumeError::Poison(e.to_string()))?;
        let EventData::TaskCompleted(completed) = &envelope.data else {
            return Ok(());
        };
        if completed.recurrence_id.is_none() {
            return Ok(());
        }

        if !self
            .guard
            .claim(self.group(), envelope.id)
            .await
            .map_err(|e| ConsumeError::Transient(e.to_string()))?
        {
            return Ok(());
        }

        let result = self.generate_next(&envelope, completed).await;
        if matches!(result, Err(ConsumeError::Transient(_))) {
            if let Err(e) = self.guard.release(self.group(), envelope.id).await {
                warn!(event_id = %envelope.id, error = %e, "failed to release idempotency claim");
            }
        }
        result
    }

    async fn on_exhausted(&self, delivery: &Delivery, error: &ConsumeError) {
        // Recurrence is never silently dropped: exhausted events go to the
        // dead-letter topic for manual remediation.
        let Ok(envelope) = delivery.envelope() else {
            error!(offset = delivery.offset, "undecodable event abandoned on task.events");
            return;
        };
        let _ = self.guard.claim(self.group(), envelope.id).await;
        error!(
            event_id = %envelope.id,
            attempts = delivery.attempt,
            %error,
            "recurrence generation exhausted retries, dead-lettering"
        );
        let letter = DeadLetter::new(Topic::TaskEvents, envelope, error.to_string(), delivery.attempt);
        if let Err(e) = self.publisher.publish_dead_letter(&letter).await {
            error!(error = %e, "failed to publish dead letter");
        }
    }
}
