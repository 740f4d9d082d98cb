//! In-memory implementation of the storage traits
//!
//! Primarily for tests and development. Provides the same semantics as the
//! PostgreSQL implementation, including conditional reminder transitions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use tasklane_core::{
    ActivityFilter, ActivityLogEntry, ActivityPage, NewTask, RecurrencePattern, Reminder,
    ReminderStatus, Task,
};

use crate::store::{ActivityStore, StoreError, TaskStore};

/// In-memory task-store boundary.
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
    reminders: RwLock<HashMap<Uuid, Reminder>>,
    patterns: RwLock<HashMap<Uuid, RecurrencePattern>>,
    fail_next_creates: AtomicU32,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            reminders: RwLock::new(HashMap::new()),
            patterns: RwLock::new(HashMap::new()),
            fail_next_creates: AtomicU32::new(0),
        }
    }

    /// Seed a task directly (standing in for the external CRUD surface).
    pub fn insert_task(&self, task: Task) {
        self.tasks.write().insert(task.id, task);
    }

    /// Seed a recurrence pattern directly.
    pub fn insert_pattern(&self, pattern: RecurrencePattern) {
        self.patterns.write().insert(pattern.id, pattern);
    }

    /// Seed a reminder directly, bypassing the past-time check in
    /// schedule_reminder (for scheduler tests).
    pub fn insert_reminder(&self, reminder: Reminder) {
        self.reminders.write().insert(reminder.id, reminder);
    }

    /// Mark a task complete directly (standing in for the external CRUD
    /// surface).
    pub fn set_task_complete(&self, id: Uuid) {
        if let Some(task) = self.tasks.write().get_mut(&id) {
            task.is_complete = true;
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn reminder_count(&self) -> usize {
        self.reminders.read().len()
    }

    /// Make the next N create_task calls fail (for retry-path tests).
    pub fn fail_next_creates(&self, n: u32) {
        self.fail_next_creates.store(n, Ordering::SeqCst);
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.read().get(&id).cloned())
    }

    async fn create_task(&self, fields: NewTask) -> Result<Task, StoreError> {
        if self
            .fail_next_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n > 0).then(|| n - 1))
            .is_ok()
        {
            return Err(StoreError::Database("injected create failure".to_string()));
        }

        let task = Task {
            id: Uuid::new_v4(),
            user_id: fields.user_id,
            title: fields.title,
            description: fields.description,
            due_date: fields.due_date,
            priority: fields.priority,
            is_complete: false,
            tags: fields.tags,
            recurrence_id: fields.recurrence_id,
            parent_task_id: fields.parent_task_id,
            reminder_offset_minutes: fields.reminder_offset_minutes,
            created_at: Utc::now(),
        };
        self.tasks.write().insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_recurrence_pattern(
        &self,
        id: Uuid,
    ) -> Result<Option<RecurrencePattern>, StoreError> {
        Ok(self.patterns.read().get(&id).cloned())
    }

    async fn get_reminder(&self, id: Uuid) -> Result<Option<Reminder>, StoreError> {
        Ok(self.reminders.read().get(&id).cloned())
    }

    async fn schedule_reminder(
        &self,
        task: &Task,
        channel: &str,
    ) -> Result<Option<Reminder>, StoreError> {
        let Some(new_reminder) = Reminder::for_task(task, channel) else {
            return Ok(None);
        };

        let mut reminders = self.reminders.write();
        // Update the existing pending reminder in place, if any.
        if let Some(existing) = reminders
            .values_mut()
            .find(|r| r.task_id == task.id && r.status == ReminderStatus::Pending)
        {
            existing.scheduled_time = new_reminder.scheduled_time;
            existing.delivery_channel = new_reminder.delivery_channel;
            return Ok(Some(existing.clone()));
        }

        reminders.insert(new_reminder.id, new_reminder.clone());
        Ok(Some(new_reminder))
    }

    async fn get_due_reminders(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Reminder>, StoreError> {
        let reminders = self.reminders.read();
        let mut due: Vec<Reminder> = reminders
            .values()
            .filter(|r| r.status == ReminderStatus::Pending && r.scheduled_time <= before)
            .cloned()
            .collect();
        due.sort_by_key(|r| r.scheduled_time);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn transition_reminder(
        &self,
        id: Uuid,
        from: ReminderStatus,
        to: ReminderStatus,
    ) -> Result<bool, StoreError> {
        let mut reminders = self.reminders.write();
        let Some(reminder) = reminders.get_mut(&id) else {
            return Err(StoreError::ReminderNotFound(id));
        };
        if reminder.status != from {
            return Ok(false);
        }
        reminder.status = to;
        Ok(true)
    }

    async fn mark_reminder_sent(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut reminders = self.reminders.write();
        let Some(reminder) = reminders.get_mut(&id) else {
            return Ok(false);
        };
        if reminder.status.is_terminal() {
            return Ok(false);
        }
        reminder.status = ReminderStatus::Sent;
        reminder.sent_at = Some(Utc::now());
        Ok(true)
    }

    async fn mark_reminder_failed(&self, id: Uuid, error: &str) -> Result<bool, StoreError> {
        let mut reminders = self.reminders.write();
        let Some(reminder) = reminders.get_mut(&id) else {
            return Ok(false);
        };
        if reminder.status.is_terminal() {
            return Ok(false);
        }
        reminder.status = ReminderStatus::Failed;
        reminder.retry_count += 1;
        reminder.error_message = Some(error.to_string());
        Ok(true)
    }

    async fn cancel_pending_reminder(&self, task_id: Uuid) -> Result<bool, StoreError> {
        let mut reminders = self.reminders.write();
        for reminder in reminders.values_mut() {
            if reminder.task_id == task_id && reminder.status == ReminderStatus::Pending {
                reminder.status = ReminderStatus::Cancelled;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

// ============================================================================
// Activity log
// ============================================================================

/// In-memory append-only activity log.
pub struct InMemoryActivityStore {
    entries: RwLock<Vec<ActivityLogEntry>>,
}

impl InMemoryActivityStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for InMemoryActivityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActivityStore for InMemoryActivityStore {
    async fn append(&self, entry: ActivityLogEntry) -> Result<(), StoreError> {
        self.entries.write().push(entry);
        Ok(())
    }

    async fn query(
        &self,
        filter: &ActivityFilter,
        page: u32,
        limit: u32,
    ) -> Result<ActivityPage, StoreError> {
        let page = page.max(1);
        let limit = limit.max(1);

        let entries = self.entries.read();
        let mut matched: Vec<ActivityLogEntry> = entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total_items = matched.len() as u64;
        let offset = ((page - 1) * limit) as usize;
        let entries = matched
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .collect();

        Ok(ActivityPage {
            entries,
            page,
            limit,
            total_items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasklane_core::TaskPriority;

    fn seeded_task(store: &InMemoryTaskStore, offset_minutes: Option<i64>) -> Task {
        let task = Task {
            id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            title: "review budget".to_string(),
            description: String::new(),
            due_date: Some(Utc::now() + chrono::Duration::hours(2)),
            priority: TaskPriority::High,
            is_complete: false,
            tags: vec!["finance".to_string()],
            recurrence_id: None,
            parent_task_id: None,
            reminder_offset_minutes: offset_minutes,
            created_at: Utc::now(),
        };
        store.insert_task(task.clone());
        task
    }

    #[tokio::test]
    async fn test_schedule_reminder_once_per_task() {
        let store = InMemoryTaskStore::new();
        let task = seeded_task(&store, Some(60));

        let first = store.schedule_reminder(&task, "in-app").await.unwrap().unwrap();
        let second = store.schedule_reminder(&task, "email").await.unwrap().unwrap();

        // Second call updated the pending reminder instead of adding one.
        assert_eq!(first.id, second.id);
        assert_eq!(second.delivery_channel, "email");
        assert_eq!(store.reminder_count(), 1);
    }

    #[tokio::test]
    async fn test_due_reminders_ordering_and_cutoff() {
        let store = InMemoryTaskStore::new();
        let task = seeded_task(&store, Some(30));
        let reminder = store.schedule_reminder(&task, "in-app").await.unwrap().unwrap();

        // Not yet due.
        let due = store.get_due_reminders(Utc::now(), 10).await.unwrap();
        assert!(due.is_empty());

        // Due once the cutoff passes the scheduled time.
        let due = store
            .get_due_reminders(reminder.scheduled_time + chrono::Duration::seconds(1), 10)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn test_transition_is_conditional() {
        let store = InMemoryTaskStore::new();
        let task = seeded_task(&store, Some(60));
        let reminder = store.schedule_reminder(&task, "in-app").await.unwrap().unwrap();

        // First transition wins, second observes the advanced state.
        assert!(store
            .transition_reminder(reminder.id, ReminderStatus::Pending, ReminderStatus::Fired)
            .await
            .unwrap());
        assert!(!store
            .transition_reminder(reminder.id, ReminderStatus::Pending, ReminderStatus::Fired)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_cancel_only_hits_pending() {
        let store = InMemoryTaskStore::new();
        let task = seeded_task(&store, Some(60));
        let reminder = store.schedule_reminder(&task, "in-app").await.unwrap().unwrap();

        store
            .transition_reminder(reminder.id, ReminderStatus::Pending, ReminderStatus::Fired)
            .await
            .unwrap();

        assert!(!store.cancel_pending_reminder(task.id).await.unwrap());
        let reminder = store.get_reminder(reminder.id).await.unwrap().unwrap();
        assert_eq!(reminder.status, ReminderStatus::Fired);
    }

    #[tokio::test]
    async fn test_mark_failed_bumps_retry_count() {
        let store = InMemoryTaskStore::new();
        let task = seeded_task(&store, Some(60));
        let reminder = store.schedule_reminder(&task, "in-app").await.unwrap().unwrap();

        assert!(store.mark_reminder_failed(reminder.id, "boom").await.unwrap());
        let reminder = store.get_reminder(reminder.id).await.unwrap().unwrap();
        assert_eq!(reminder.status, ReminderStatus::Failed);
        assert_eq!(reminder.retry_count, 1);
        assert_eq!(reminder.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_activity_pagination_newest_first() {
        let store = InMemoryActivityStore::new();
        for i in 0..5 {
            store
                .append(ActivityLogEntry {
                    id: Uuid::new_v4(),
                    user_id: "user-1".to_string(),
                    event_type: "task.created".to_string(),
                    entity_type: "task".to_string(),
                    entity_id: Uuid::new_v4(),
                    timestamp: Utc::now() + chrono::Duration::seconds(i),
                    details: serde_json::json!({}),
                    correlation_id: None,
                })
                .await
                .unwrap();
        }

        let filter = ActivityFilter::for_user("user-1");
        let page1 = store.query(&filter, 1, 2).await.unwrap();
        assert_eq!(page1.total_items, 5);
        assert_eq!(page1.entries.len(), 2);
        assert!(page1.entries[0].timestamp > page1.entries[1].timestamp);

        let page3 = store.query(&filter, 3, 2).await.unwrap();
        assert_eq!(page3.entries.len(), 1);
    }
}
