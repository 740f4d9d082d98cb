//! Storage trait definitions
//!
//! `TaskStore` is the synchronous request/response contract the engine
//! consumes from the external task service; `ActivityStore` is the
//! append-only audit persistence this subsystem owns. Implementations must
//! be thread-safe and support concurrent access; every reminder transition
//! is a single-row conditional write so concurrent scheduler instances race
//! safely.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use tasklane_core::{
    ActivityFilter, ActivityLogEntry, ActivityPage, NewTask, RecurrencePattern, Reminder,
    ReminderStatus, Task,
};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Task not found
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    /// Reminder not found
    #[error("reminder not found: {0}")]
    ReminderNotFound(Uuid),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Stored value could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Task-store boundary consumed by the engine.
///
/// Calls are synchronous request/response with their own timeout and retry
/// policy, independent of the bus.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError>;

    async fn create_task(&self, fields: NewTask) -> Result<Task, StoreError>;

    async fn get_recurrence_pattern(
        &self,
        id: Uuid,
    ) -> Result<Option<RecurrencePattern>, StoreError>;

    async fn get_reminder(&self, id: Uuid) -> Result<Option<Reminder>, StoreError>;

    /// Derive and persist a pending reminder for a task. An existing
    /// pending reminder for the task is updated in place (at most one
    /// non-terminal reminder per task). Returns None when the task has no
    /// due date, no offset, or the derived time is already past.
    async fn schedule_reminder(
        &self,
        task: &Task,
        channel: &str,
    ) -> Result<Option<Reminder>, StoreError>;

    /// Pending reminders whose scheduled time is at or before `before`,
    /// oldest first.
    async fn get_due_reminders(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Reminder>, StoreError>;

    /// Conditionally move a reminder from one status to another. Returns
    /// true when this caller performed the transition, false when the
    /// reminder was no longer in `from` (another instance won the race, or
    /// the state already advanced).
    async fn transition_reminder(
        &self,
        id: Uuid,
        from: ReminderStatus,
        to: ReminderStatus,
    ) -> Result<bool, StoreError>;

    /// Mark a reminder delivered, stamping `sent_at`.
    async fn mark_reminder_sent(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Mark a reminder failed, recording the error and bumping the retry
    /// count.
    async fn mark_reminder_failed(&self, id: Uuid, error: &str) -> Result<bool, StoreError>;

    /// Cancel the pending reminder for a task, if one exists. Best-effort:
    /// a reminder that already fired stays fired.
    async fn cancel_pending_reminder(&self, task_id: Uuid) -> Result<bool, StoreError>;
}

/// Append-only activity log owned by this subsystem.
#[async_trait]
pub trait ActivityStore: Send + Sync + 'static {
    async fn append(&self, entry: ActivityLogEntry) -> Result<(), StoreError>;

    /// Paginated query, newest first. `page` is 1-indexed.
    async fn query(
        &self,
        filter: &ActivityFilter,
        page: u32,
        limit: u32,
    ) -> Result<ActivityPage, StoreError>;
}
