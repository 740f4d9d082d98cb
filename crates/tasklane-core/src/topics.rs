// Topic catalog
//
// Topics are organized by purpose:
// - task.events: all task lifecycle events (create, update, complete, delete)
// - reminder.due: reminders that are due for delivery
// - notification.send: notification delivery outcomes (sent/failed)
// - notification.dlq: dead letter topic for exhausted deliveries
// - activity.log: activity stream for the audit trail
// - sync.events: real-time sync events for live connections
//
// The partition key is user_id on every topic, so per-user ordering falls
// out of the broker's per-partition ordering guarantee.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Topic names for the task lifecycle stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "task.events")]
    TaskEvents,
    #[serde(rename = "reminder.due")]
    ReminderDue,
    #[serde(rename = "notification.send")]
    NotificationSend,
    #[serde(rename = "notification.dlq")]
    NotificationDlq,
    #[serde(rename = "activity.log")]
    ActivityLog,
    #[serde(rename = "sync.events")]
    SyncEvents,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::TaskEvents => "task.events",
            Topic::ReminderDue => "reminder.due",
            Topic::NotificationSend => "notification.send",
            Topic::NotificationDlq => "notification.dlq",
            Topic::ActivityLog => "activity.log",
            Topic::SyncEvents => "sync.events",
        }
    }

    /// How long the broker retains records on this topic.
    ///
    /// The idempotency claim TTL must cover the longest of these windows,
    /// otherwise an expired claim could let a late redelivery re-run a
    /// side effect.
    pub fn retention(&self) -> Duration {
        const HOUR: u64 = 60 * 60;
        const DAY: u64 = 24 * HOUR;
        match self {
            Topic::TaskEvents => Duration::from_secs(7 * DAY),
            Topic::ReminderDue => Duration::from_secs(DAY),
            Topic::NotificationSend => Duration::from_secs(DAY),
            Topic::NotificationDlq => Duration::from_secs(30 * DAY),
            Topic::ActivityLog => Duration::from_secs(30 * DAY),
            Topic::SyncEvents => Duration::from_secs(HOUR),
        }
    }

    /// Partition count used when provisioning the broker.
    pub fn partitions(&self) -> u32 {
        match self {
            Topic::TaskEvents => 12,
            Topic::ReminderDue => 6,
            Topic::NotificationSend => 6,
            Topic::NotificationDlq => 3,
            Topic::ActivityLog => 12,
            Topic::SyncEvents => 12,
        }
    }

    pub fn all() -> [Topic; 6] {
        [
            Topic::TaskEvents,
            Topic::ReminderDue,
            Topic::NotificationSend,
            Topic::NotificationDlq,
            Topic::ActivityLog,
            Topic::SyncEvents,
        ]
    }

    /// The longest retention across all topics.
    pub fn max_retention() -> Duration {
        Topic::all()
            .iter()
            .map(Topic::retention)
            .max()
            .unwrap_or(Duration::ZERO)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Consumer Groups
// ============================================================================

/// Logical consumer names. Each consumer scopes its idempotency claims by
/// its own group name plus the event id, so one consumer's claim never
/// blocks another's processing of the same event.
pub mod groups {
    pub const REMINDER_SCHEDULER: &str = "reminder-scheduler";
    pub const NOTIFICATION_DELIVERY: &str = "notification-delivery";
    pub const RECURRENCE_SERVICE: &str = "recurrence-service";
    pub const SYNC_SERVICE: &str = "sync-service";
    pub const ACTIVITY_SERVICE: &str = "activity-service";
}
