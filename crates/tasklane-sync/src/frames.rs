//! Wire frames for the real-time protocol
//!
//! Every message either direction is `{type, data}`. Server-to-client
//! types: connected, sync, notification, pong, resync_required, error.
//! Client-to-server types: ping, pong, sync_request.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use tasklane_core::{Envelope, EventData};
use tasklane_engine::NotificationMessage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Frame {
    pub fn connected() -> Self {
        Self {
            frame_type: "connected".to_string(),
            data: json!({
                "message": "Connected to real-time sync",
                "timestamp": Utc::now(),
            }),
        }
    }

    /// Convert a task lifecycle event into a sync frame.
    pub fn sync(envelope: &Envelope) -> Self {
        let (entity_type, entity_id) = envelope.data.entity();
        Self {
            frame_type: "sync".to_string(),
            data: json!({
                "entity_type": entity_type,
                "entity_id": entity_id,
                "operation": operation_for(&envelope.data),
                "payload": envelope.data,
                "event_id": envelope.id,
                "timestamp": envelope.time,
            }),
        }
    }

    pub fn notification(message: &NotificationMessage) -> Self {
        Self {
            frame_type: "notification".to_string(),
            data: json!({
                "title": message.title,
                "body": message.body,
                "notification_type": message.channel,
                "action_url": message.action_url,
                "timestamp": Utc::now(),
            }),
        }
    }

    pub fn pong(timestamp: serde_json::Value) -> Self {
        Self {
            frame_type: "pong".to_string(),
            data: json!({ "timestamp": timestamp }),
        }
    }

    /// The lookback window rolled past the client's checkpoint; it must
    /// refetch its state through the task-store surface.
    pub fn resync_required() -> Self {
        Self {
            frame_type: "resync_required".to_string(),
            data: json!({
                "message": "Checkpoint outside the replay window, perform a full resync",
            }),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            frame_type: "error".to_string(),
            data: json!({ "message": message.into() }),
        }
    }
}

fn operation_for(data: &EventData) -> &'static str {
    match data {
        EventData::TaskCreated(_) => "create",
        EventData::TaskDeleted(_) => "delete",
        _ => "update",
    }
}

/// Client-to-server messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping {
        #[serde(default)]
        data: serde_json::Value,
    },
    Pong {
        #[serde(default)]
        data: serde_json::Value,
    },
    SyncRequest {
        #[serde(default)]
        data: SyncRequestData,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncRequestData {
    pub last_event_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasklane_core::{envelope::SOURCE_TASKS, TaskDeletedData};

    #[test]
    fn test_sync_frame_shape() {
        let envelope = Envelope::new(
            SOURCE_TASKS,
            TaskDeletedData {
                task_id: Uuid::new_v4(),
                user_id: "user-1".to_string(),
                title: "done".to_string(),
            },
        );
        let frame = Frame::sync(&envelope);

        assert_eq!(frame.frame_type, "sync");
        assert_eq!(frame.data["operation"], "delete");
        assert_eq!(frame.data["entity_type"], "task");
        assert_eq!(frame.data["event_id"], json!(envelope.id));
    }

    #[test]
    fn test_client_message_parsing() {
        let message: ClientMessage =
            serde_json::from_str(r#"{"type": "ping", "data": {"timestamp": "t"}}"#).unwrap();
        assert!(matches!(message, ClientMessage::Ping { .. }));

        let id = Uuid::new_v4();
        let message: ClientMessage = serde_json::from_str(&format!(
            r#"{{"type": "sync_request", "data": {{"last_event_id": "{id}"}}}}"#
        ))
        .unwrap();
        let ClientMessage::SyncRequest { data } = message else {
            panic!("expected sync_request");
        };
        assert_eq!(data.last_event_id, Some(id));

        // Unknown types fail to parse and are handled as protocol errors.
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "subscribe"}"#).is_err());
    }
}
