// Event Envelope
//
// This module defines the standard event envelope used throughout Tasklane.
// All events follow a CloudEvents v1.0 shape: specversion, id, type, source,
// time, datacontenttype, data. The envelope id doubles as the idempotency key
// for every consumer; producers must never reuse one. The partition key is
// always the owning user id and is carried as publish metadata, not in the
// envelope body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::task::TaskPriority;

// ============================================================================
// Event Type Constants
// ============================================================================

pub const TASK_CREATED: &str = "task.created";
pub const TASK_UPDATED: &str = "task.updated";
pub const TASK_COMPLETED: &str = "task.completed";
pub const TASK_DELETED: &str = "task.deleted";
pub const REMINDER_DUE: &str = "reminder.due";
pub const NOTIFICATION_SENT: &str = "notification.sent";
pub const NOTIFICATION_FAILED: &str = "notification.failed";

/// CloudEvents specification version emitted by every producer.
pub const SPEC_VERSION: &str = "1.0";

/// Content type of every serialized envelope body.
pub const CONTENT_TYPE: &str = "application/json";

// Producer source paths
pub const SOURCE_TASKS: &str = "/api/tasks";
pub const SOURCE_SCHEDULER: &str = "/scheduler/reminders";
pub const SOURCE_NOTIFICATIONS: &str = "/notifications";
pub const SOURCE_RECURRENCE: &str = "/engine/recurrence";

// ============================================================================
// Envelope
// ============================================================================

/// CloudEvents-style envelope wrapping every message on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Envelope {
    pub specversion: String,
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub time: DateTime<Utc>,
    pub datacontenttype: String,
    pub data: EventData,
}

impl Envelope {
    /// Create a new envelope with a fresh id and the current time.
    ///
    /// The event type string is derived from the payload variant.
    pub fn new(source: impl Into<String>, data: impl Into<EventData>) -> Self {
        let data = data.into();
        Self {
            specversion: SPEC_VERSION.to_string(),
            id: Uuid::new_v4(),
            event_type: data.event_type().to_string(),
            source: source.into(),
            time: Utc::now(),
            datacontenttype: CONTENT_TYPE.to_string(),
            data,
        }
    }

    /// Create an envelope with an explicit id (for replay/testing).
    pub fn with_id(id: Uuid, source: impl Into<String>, data: impl Into<EventData>) -> Self {
        let data = data.into();
        Self {
            specversion: SPEC_VERSION.to_string(),
            id,
            event_type: data.event_type().to_string(),
            source: source.into(),
            time: Utc::now(),
            datacontenttype: CONTENT_TYPE.to_string(),
            data,
        }
    }

    /// The partition key for this envelope: always the owning user id.
    pub fn partition_key(&self) -> &str {
        self.data.user_id()
    }

    pub fn is_task_event(&self) -> bool {
        self.event_type.starts_with("task.")
    }

    pub fn is_notification_event(&self) -> bool {
        self.event_type.starts_with("notification.")
    }
}

// ============================================================================
// Payload Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct TaskCreatedData {
    pub task_id: Uuid,
    pub user_id: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub priority: TaskPriority,
    pub is_complete: bool,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_offset_minutes: Option<i64>,
}

/// Field-level change set for task.updated events: field name to {old, new}.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct TaskUpdatedData {
    pub task_id: Uuid,
    pub user_id: String,
    pub changes: serde_json::Value,
    pub current_state: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct TaskCompletedData {
    pub task_id: Uuid,
    pub user_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub priority: TaskPriority,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct TaskDeletedData {
    pub task_id: Uuid,
    pub user_id: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ReminderDueData {
    pub reminder_id: Uuid,
    pub task_id: Uuid,
    pub user_id: String,
    pub task_title: String,
    pub task_due_date: DateTime<Utc>,
    pub delivery_channel: String,
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct NotificationFailedData {
    pub notification_id: Uuid,
    pub reminder_id: Uuid,
    pub task_id: Uuid,
    pub user_id: String,
    pub channel: String,
    pub error: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct NotificationSentData {
    pub notification_id: Uuid,
    pub reminder_id: Uuid,
    pub task_id: Uuid,
    pub user_id: String,
    pub channel: String,
}

// ============================================================================
// EventData Enum
// ============================================================================

/// Type-specific payload of an envelope.
///
/// Serialized untagged: the envelope-level `type` field identifies the
/// variant on the wire. Variant order matters for deserialization; more
/// specific shapes are listed before shapes they structurally contain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub enum EventData {
    TaskCreated(TaskCreatedData),
    TaskUpdated(TaskUpdatedData),
    ReminderDue(ReminderDueData),
    NotificationFailed(NotificationFailedData),
    NotificationSent(NotificationSentData),
    TaskCompleted(TaskCompletedData),
    TaskDeleted(TaskDeletedData),
}

impl EventData {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventData::TaskCreated(_) => TASK_CREATED,
            EventData::TaskUpdated(_) => TASK_UPDATED,
            EventData::TaskCompleted(_) => TASK_COMPLETED,
            EventData::TaskDeleted(_) => TASK_DELETED,
            EventData::ReminderDue(_) => REMINDER_DUE,
            EventData::NotificationSent(_) => NOTIFICATION_SENT,
            EventData::NotificationFailed(_) => NOTIFICATION_FAILED,
        }
    }

    /// The owning user id, used as the partition key on every topic.
    pub fn user_id(&self) -> &str {
        match self {
            EventData::TaskCreated(d) => &d.user_id,
            EventData::TaskUpdated(d) => &d.user_id,
            EventData::TaskCompleted(d) => &d.user_id,
            EventData::TaskDeleted(d) => &d.user_id,
            EventData::ReminderDue(d) => &d.user_id,
            EventData::NotificationSent(d) => &d.user_id,
            EventData::NotificationFailed(d) => &d.user_id,
        }
    }

    /// The primary entity this event is about, as (entity_type, entity_id).
    pub fn entity(&self) -> (&'static str, Uuid) {
        match self {
            EventData::TaskCreated(d) => ("task", d.task_id),
            EventData::TaskUpdated(d) => ("task", d.task_id),
            EventData::TaskCompleted(d) => ("task", d.task_id),
            EventData::TaskDeleted(d) => ("task", d.task_id),
            EventData::ReminderDue(d) => ("reminder", d.reminder_id),
            EventData::NotificationSent(d) => ("reminder", d.reminder_id),
            EventData::NotificationFailed(d) => ("reminder", d.reminder_id),
        }
    }
}

impl From<TaskCreatedData> for EventData {
    fn from(data: TaskCreatedData) -> Self {
        EventData::TaskCreated(data)
    }
}

impl From<TaskUpdatedData> for EventData {
    fn from(data: TaskUpdatedData) -> Self {
        EventData::TaskUpdated(data)
    }
}

impl From<TaskCompletedData> for EventData {
    fn from(data: TaskCompletedData) -> Self {
        EventData::TaskCompleted(data)
    }
}

impl From<TaskDeletedData> for EventData {
    fn from(data: TaskDeletedData) -> Self {
        EventData::TaskDeleted(data)
    }
}

impl From<ReminderDueData> for EventData {
    fn from(data: ReminderDueData) -> Self {
        EventData::ReminderDue(data)
    }
}

impl From<NotificationSentData> for EventData {
    fn from(data: NotificationSentData) -> Self {
        EventData::NotificationSent(data)
    }
}

impl From<NotificationFailedData> for EventData {
    fn from(data: NotificationFailedData) -> Self {
        EventData::NotificationFailed(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed_data() -> TaskCompletedData {
        TaskCompletedData {
            task_id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            title: "write report".to_string(),
            due_date: None,
            priority: TaskPriority::Medium,
            tags: vec![],
            recurrence_id: None,
            parent_task_id: None,
        }
    }

    #[test]
    fn test_envelope_creation() {
        let event = Envelope::new(SOURCE_TASKS, completed_data());

        assert_eq!(event.specversion, "1.0");
        assert_eq!(event.event_type, "task.completed");
        assert_eq!(event.source, "/api/tasks");
        assert_eq!(event.partition_key(), "user-1");
        assert!(event.is_task_event());
    }

    #[test]
    fn test_envelope_roundtrip_preserves_variant() {
        let event = Envelope::new(SOURCE_TASKS, completed_data());
        let json = serde_json::to_string(&event).unwrap();
        let parsed: Envelope = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, event.id);
        assert_eq!(parsed.data.event_type(), "task.completed");
    }

    #[test]
    fn test_deleted_does_not_parse_as_completed() {
        let event = Envelope::new(
            SOURCE_TASKS,
            TaskDeletedData {
                task_id: Uuid::new_v4(),
                user_id: "user-2".to_string(),
                title: "old task".to_string(),
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let parsed: Envelope = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.data.event_type(), "task.deleted");
        assert_eq!(parsed.data.entity().0, "task");
    }

    #[test]
    fn test_notification_failed_carries_error() {
        let data = NotificationFailedData {
            notification_id: Uuid::new_v4(),
            reminder_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            user_id: "user-3".to_string(),
            channel: "in-app".to_string(),
            error: "connection refused".to_string(),
            attempts: 5,
        };
        let event = Envelope::new(SOURCE_NOTIFICATIONS, data);
        let json = serde_json::to_string(&event).unwrap();
        let parsed: Envelope = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.data.event_type(), "notification.failed");
        assert!(parsed.is_notification_event());
    }
}
