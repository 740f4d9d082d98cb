//! Connection registry
//!
//! Tracks live per-user connections. A user may hold several at once
//! (tabs, devices). The map is sharded by user id via dashmap, so two
//! users' broadcasts never contend on one lock; lookups stay non-blocking.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::frames::Frame;

struct Connection {
    id: Uuid,
    sender: mpsc::UnboundedSender<Frame>,
    connected_at: DateTime<Utc>,
    last_ping: Mutex<DateTime<Utc>>,
}

/// Registry of active real-time connections, keyed by user id.
pub struct ConnectionRegistry {
    connections: DashMap<String, Vec<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a connection; the receiver end feeds the transport.
    pub fn register(&self, user_id: &str) -> (Uuid, mpsc::UnboundedReceiver<Frame>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let connection = Connection {
            id: Uuid::new_v4(),
            sender,
            connected_at: Utc::now(),
            last_ping: Mutex::new(Utc::now()),
        };
        let id = connection.id;

        self.connections
            .entry(user_id.to_string())
            .or_default()
            .push(connection);

        info!(
            user_id,
            connection_id = %id,
            total = self.connection_count(user_id),
            "connection registered"
        );
        (id, receiver)
    }

    pub fn unregister(&self, user_id: &str, connection_id: Uuid) {
        let mut remove_user = false;
        if let Some(mut connections) = self.connections.get_mut(user_id) {
            connections.retain(|c| c.id != connection_id);
            remove_user = connections.is_empty();
        }
        if remove_user {
            self.connections
                .remove_if(user_id, |_, connections| connections.is_empty());
        }
        info!(
            user_id,
            connection_id = %connection_id,
            remaining = self.connection_count(user_id),
            "connection unregistered"
        );
    }

    /// Push a frame to every connection of a user, pruning any that have
    /// gone away. Returns how many connections received the frame.
    pub fn broadcast_to_user(&self, user_id: &str, frame: &Frame) -> usize {
        let mut sent = 0;
        let mut remove_user = false;

        if let Some(mut connections) = self.connections.get_mut(user_id) {
            connections.retain(|connection| match connection.sender.send(frame.clone()) {
                Ok(()) => {
                    sent += 1;
                    true
                }
                Err(_) => {
                    debug!(user_id, connection_id = %connection.id, "pruning dead connection");
                    false
                }
            });
            remove_user = connections.is_empty();
        }
        if remove_user {
            self.connections
                .remove_if(user_id, |_, connections| connections.is_empty());
        }
        sent
    }

    /// Push a frame to one specific connection of a user.
    pub fn send_to_connection(&self, user_id: &str, connection_id: Uuid, frame: Frame) -> bool {
        self.connections
            .get(user_id)
            .and_then(|connections| {
                connections
                    .iter()
                    .find(|c| c.id == connection_id)
                    .map(|c| c.sender.send(frame).is_ok())
            })
            .unwrap_or(false)
    }

    pub fn update_ping(&self, user_id: &str, connection_id: Uuid) {
        if let Some(connections) = self.connections.get(user_id) {
            if let Some(connection) = connections.iter().find(|c| c.id == connection_id) {
                *connection.last_ping.lock() = Utc::now();
            }
        }
    }

    pub fn connection_count(&self, user_id: &str) -> usize {
        self.connections
            .get(user_id)
            .map(|connections| connections.len())
            .unwrap_or(0)
    }

    pub fn total_connections(&self) -> usize {
        self.connections
            .iter()
            .map(|entry| entry.value().len())
            .sum()
    }

    pub fn connected_users(&self) -> Vec<String> {
        self.connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Age of a connection, if it is still registered.
    pub fn connected_at(&self, user_id: &str, connection_id: Uuid) -> Option<DateTime<Utc>> {
        self.connections.get(user_id).and_then(|connections| {
            connections
                .iter()
                .find(|c| c.id == connection_id)
                .map(|c| c.connected_at)
        })
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_count() {
        let registry = ConnectionRegistry::new();
        let (id1, _rx1) = registry.register("user-1");
        let (_id2, _rx2) = registry.register("user-1");
        let (_id3, _rx3) = registry.register("user-2");

        assert_eq!(registry.connection_count("user-1"), 2);
        assert_eq!(registry.total_connections(), 3);

        registry.unregister("user-1", id1);
        assert_eq!(registry.connection_count("user-1"), 1);
    }

    #[test]
    fn test_broadcast_reaches_all_user_connections() {
        let registry = ConnectionRegistry::new();
        let (_id1, mut rx1) = registry.register("user-1");
        let (_id2, mut rx2) = registry.register("user-1");
        let (_id3, mut rx3) = registry.register("user-2");

        let sent = registry.broadcast_to_user("user-1", &Frame::connected());
        assert_eq!(sent, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_prunes_closed_connections() {
        let registry = ConnectionRegistry::new();
        let (_id1, rx1) = registry.register("user-1");
        let (_id2, _rx2) = registry.register("user-1");
        drop(rx1);

        let sent = registry.broadcast_to_user("user-1", &Frame::connected());
        assert_eq!(sent, 1);
        assert_eq!(registry.connection_count("user-1"), 1);
    }

    #[test]
    fn test_empty_user_entry_removed() {
        let registry = ConnectionRegistry::new();
        let (id, rx) = registry.register("user-1");
        drop(rx);
        registry.unregister("user-1", id);

        assert_eq!(registry.total_connections(), 0);
        assert!(registry.connected_users().is_empty());
    }

    #[test]
    fn test_send_to_single_connection() {
        let registry = ConnectionRegistry::new();
        let (id1, mut rx1) = registry.register("user-1");
        let (_id2, mut rx2) = registry.register("user-1");

        assert!(registry.send_to_connection("user-1", id1, Frame::connected()));
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }
}
