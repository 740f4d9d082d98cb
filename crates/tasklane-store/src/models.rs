// Database row models (internal, may differ from the public DTOs)

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use tasklane_core::{
    ActivityLogEntry, RecurrenceKind, RecurrencePattern, Reminder, ReminderStatus, Task,
    TaskPriority,
};

use crate::store::StoreError;

#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: String,
    pub is_complete: bool,
    pub tags: Vec<String>,
    pub recurrence_id: Option<Uuid>,
    pub parent_task_id: Option<Uuid>,
    pub reminder_offset_minutes: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            description: row.description,
            due_date: row.due_date,
            priority: parse_priority(&row.priority)?,
            is_complete: row.is_complete,
            tags: row.tags,
            recurrence_id: row.recurrence_id,
            parent_task_id: row.parent_task_id,
            reminder_offset_minutes: row.reminder_offset_minutes,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ReminderRow {
    pub id: Uuid,
    pub task_id: Uuid,
    pub user_id: String,
    pub scheduled_time: DateTime<Utc>,
    pub status: String,
    pub delivery_channel: String,
    pub retry_count: i32,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ReminderRow> for Reminder {
    type Error = StoreError;

    fn try_from(row: ReminderRow) -> Result<Self, Self::Error> {
        Ok(Reminder {
            id: row.id,
            task_id: row.task_id,
            user_id: row.user_id,
            scheduled_time: row.scheduled_time,
            status: parse_status(&row.status)?,
            delivery_channel: row.delivery_channel,
            retry_count: row.retry_count.max(0) as u32,
            sent_at: row.sent_at,
            error_message: row.error_message,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct RecurrencePatternRow {
    pub id: Uuid,
    pub user_id: String,
    pub kind: String,
    pub repeat_interval: i32,
    pub days_of_week: Option<sqlx::types::Json<Vec<u32>>>,
    pub day_of_month: Option<i32>,
    pub month_of_year: Option<i32>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<RecurrencePatternRow> for RecurrencePattern {
    type Error = StoreError;

    fn try_from(row: RecurrencePatternRow) -> Result<Self, Self::Error> {
        Ok(RecurrencePattern {
            id: row.id,
            user_id: row.user_id,
            kind: parse_kind(&row.kind)?,
            interval: row.repeat_interval.max(1) as u32,
            days_of_week: row.days_of_week.map(|json| json.0),
            day_of_month: row.day_of_month.map(|d| d.max(1) as u32),
            month_of_year: row.month_of_year.map(|m| m.max(1) as u32),
            end_date: row.end_date,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ActivityRow {
    pub id: Uuid,
    pub user_id: String,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub details: serde_json::Value,
    pub correlation_id: Option<String>,
}

impl From<ActivityRow> for ActivityLogEntry {
    fn from(row: ActivityRow) -> Self {
        ActivityLogEntry {
            id: row.id,
            user_id: row.user_id,
            event_type: row.event_type,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            timestamp: row.occurred_at,
            details: row.details,
            correlation_id: row.correlation_id,
        }
    }
}

pub(crate) fn parse_status(s: &str) -> Result<ReminderStatus, StoreError> {
    match s {
        "pending" => Ok(ReminderStatus::Pending),
        "fired" => Ok(ReminderStatus::Fired),
        "sent" => Ok(ReminderStatus::Sent),
        "cancelled" => Ok(ReminderStatus::Cancelled),
        "failed" => Ok(ReminderStatus::Failed),
        other => Err(StoreError::Decode(format!("unknown reminder status: {other}"))),
    }
}

pub(crate) fn parse_kind(s: &str) -> Result<RecurrenceKind, StoreError> {
    match s {
        "daily" => Ok(RecurrenceKind::Daily),
        "weekly" => Ok(RecurrenceKind::Weekly),
        "monthly" => Ok(RecurrenceKind::Monthly),
        "yearly" => Ok(RecurrenceKind::Yearly),
        "custom" => Ok(RecurrenceKind::Custom),
        other => Err(StoreError::Decode(format!("unknown recurrence kind: {other}"))),
    }
}

pub(crate) fn parse_priority(s: &str) -> Result<TaskPriority, StoreError> {
    match s {
        "low" => Ok(TaskPriority::Low),
        "medium" => Ok(TaskPriority::Medium),
        "high" => Ok(TaskPriority::High),
        "urgent" => Ok(TaskPriority::Urgent),
        other => Err(StoreError::Decode(format!("unknown task priority: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("fired").unwrap(), ReminderStatus::Fired);
        assert!(parse_status("exploded").is_err());
    }

    #[test]
    fn test_parse_priority() {
        assert_eq!(parse_priority("urgent").unwrap(), TaskPriority::Urgent);
        assert!(parse_priority("medium-rare").is_err());
    }
}
