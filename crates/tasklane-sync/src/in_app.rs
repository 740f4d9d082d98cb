//! In-app delivery channel
//!
//! Delivers reminder notifications by pushing a notification frame over
//! the user's live connections. A user with no live connection still
//! counts as delivered: the outcome lands in the activity log either way,
//! and holding the reminder hostage to connectivity would retry forever.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use tasklane_engine::{DeliveryChannel, DeliveryOutcome, NotificationMessage};

use crate::frames::Frame;
use crate::registry::ConnectionRegistry;

pub struct InAppChannel {
    registry: Arc<ConnectionRegistry>,
}

impl InAppChannel {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl DeliveryChannel for InAppChannel {
    fn name(&self) -> &str {
        "in-app"
    }

    async fn deliver(&self, message: &NotificationMessage) -> DeliveryOutcome {
        let frame = Frame::notification(message);
        let sent = self.registry.broadcast_to_user(&message.user_id, &frame);
        debug!(
            user_id = %message.user_id,
            connections = sent,
            "in-app notification pushed"
        );
        DeliveryOutcome::Delivered
    }
}
