// Reminder entity
//
// Reminders are scheduled from a task's due date minus its reminder offset.
// They only ever transition between statuses, never get deleted, so the
// audit trail stays reconstructible.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::task::Task;

/// Status of a reminder.
///
/// `Fired` is the intermediate status the scheduler writes after publishing
/// a reminder.due event, so the next scan skips the row. The dispatcher
/// moves fired reminders to `Sent` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub enum ReminderStatus {
    Pending,
    Fired,
    Sent,
    Cancelled,
    Failed,
}

impl ReminderStatus {
    /// Terminal statuses admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Cancelled | Self::Failed)
    }
}

impl std::fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Fired => write!(f, "fired"),
            Self::Sent => write!(f, "sent"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Reminder {
    pub id: Uuid,
    pub task_id: Uuid,
    pub user_id: String,
    pub scheduled_time: DateTime<Utc>,
    pub status: ReminderStatus,
    pub delivery_channel: String,
    pub retry_count: u32,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Reminder {
    /// Derive a pending reminder from a task's due date and offset.
    ///
    /// Returns None when the task has no due date or no offset, or when the
    /// derived time is already in the past (a reminder for a moment that has
    /// passed would fire immediately and only add noise).
    pub fn for_task(task: &Task, delivery_channel: impl Into<String>) -> Option<Self> {
        let due = task.due_date?;
        let offset = task.reminder_offset_minutes?;
        let scheduled_time = due - Duration::minutes(offset);
        if scheduled_time < Utc::now() {
            return None;
        }
        Some(Self {
            id: Uuid::new_v4(),
            task_id: task.id,
            user_id: task.user_id.clone(),
            scheduled_time,
            status: ReminderStatus::Pending,
            delivery_channel: delivery_channel.into(),
            retry_count: 0,
            sent_at: None,
            error_message: None,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskPriority;

    fn task_due_in_minutes(minutes: i64, offset: Option<i64>) -> Task {
        Task {
            id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            title: "standup".to_string(),
            description: String::new(),
            due_date: Some(Utc::now() + Duration::minutes(minutes)),
            priority: TaskPriority::Medium,
            is_complete: false,
            tags: vec![],
            recurrence_id: None,
            parent_task_id: None,
            reminder_offset_minutes: offset,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_for_task_derives_scheduled_time() {
        let task = task_due_in_minutes(120, Some(60));
        let reminder = Reminder::for_task(&task, "in-app").unwrap();

        assert_eq!(reminder.status, ReminderStatus::Pending);
        assert_eq!(reminder.task_id, task.id);
        let expected = task.due_date.unwrap() - Duration::minutes(60);
        assert_eq!(reminder.scheduled_time, expected);
    }

    #[test]
    fn test_for_task_without_offset() {
        let task = task_due_in_minutes(120, None);
        assert!(Reminder::for_task(&task, "in-app").is_none());
    }

    #[test]
    fn test_for_task_in_the_past() {
        // Due in 10 minutes with a 60 minute offset puts the reminder
        // 50 minutes ago.
        let task = task_due_in_minutes(10, Some(60));
        assert!(Reminder::for_task(&task, "in-app").is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ReminderStatus::Sent.is_terminal());
        assert!(ReminderStatus::Cancelled.is_terminal());
        assert!(ReminderStatus::Failed.is_terminal());
        assert!(!ReminderStatus::Pending.is_terminal());
        assert!(!ReminderStatus::Fired.is_terminal());
    }
}
