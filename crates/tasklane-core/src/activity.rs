// Activity log contracts
//
// One append-only entry per successfully processed source event. Entries
// are never mutated or deleted by this subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::envelope::Envelope;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ActivityLogEntry {
    pub id: Uuid,
    pub user_id: String,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
    pub correlation_id: Option<String>,
}

impl ActivityLogEntry {
    /// Summarize a bus envelope into an audit entry.
    ///
    /// The source event id becomes the correlation id so an entry can be
    /// traced back to the exact record that produced it.
    pub fn from_envelope(envelope: &Envelope) -> Self {
        let (entity_type, entity_id) = envelope.data.entity();
        Self {
            id: Uuid::new_v4(),
            user_id: envelope.partition_key().to_string(),
            event_type: envelope.event_type.clone(),
            entity_type: entity_type.to_string(),
            entity_id,
            timestamp: envelope.time,
            details: serde_json::to_value(&envelope.data).unwrap_or(serde_json::Value::Null),
            correlation_id: Some(envelope.id.to_string()),
        }
    }
}

/// Filter for the paginated activity query. The user id is required; all
/// other fields narrow the result further.
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub user_id: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub event_type: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl ActivityFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &ActivityLogEntry) -> bool {
        if entry.user_id != self.user_id {
            return false;
        }
        if let Some(entity_type) = &self.entity_type {
            if &entry.entity_type != entity_type {
                return false;
            }
        }
        if let Some(entity_id) = self.entity_id {
            if entry.entity_id != entity_id {
                return false;
            }
        }
        if let Some(event_type) = &self.event_type {
            if &entry.event_type != event_type {
                return false;
            }
        }
        if let Some(start) = self.start {
            if entry.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if entry.timestamp > end {
                return false;
            }
        }
        true
    }
}

/// One page of activity entries, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ActivityPage {
    pub entries: Vec<ActivityLogEntry>,
    pub page: u32,
    pub limit: u32,
    pub total_items: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{TaskDeletedData, SOURCE_TASKS};

    #[test]
    fn test_entry_from_envelope() {
        let task_id = Uuid::new_v4();
        let envelope = Envelope::new(
            SOURCE_TASKS,
            TaskDeletedData {
                task_id,
                user_id: "user-1".to_string(),
                title: "old".to_string(),
            },
        );

        let entry = ActivityLogEntry::from_envelope(&envelope);

        assert_eq!(entry.user_id, "user-1");
        assert_eq!(entry.event_type, "task.deleted");
        assert_eq!(entry.entity_type, "task");
        assert_eq!(entry.entity_id, task_id);
        assert_eq!(entry.correlation_id, Some(envelope.id.to_string()));
    }

    #[test]
    fn test_filter_matching() {
        let envelope = Envelope::new(
            SOURCE_TASKS,
            TaskDeletedData {
                task_id: Uuid::new_v4(),
                user_id: "user-1".to_string(),
                title: "old".to_string(),
            },
        );
        let entry = ActivityLogEntry::from_envelope(&envelope);

        assert!(ActivityFilter::for_user("user-1").matches(&entry));
        assert!(!ActivityFilter::for_user("user-2").matches(&entry));

        let mut filter = ActivityFilter::for_user("user-1");
        filter.event_type = Some("task.created".to_string());
        assert!(!filter.matches(&entry));

        let mut filter = ActivityFilter::for_user("user-1");
        filter.end = Some(entry.timestamp - chrono::Duration::seconds(1));
        assert!(!filter.matches(&entry));
    }
}
