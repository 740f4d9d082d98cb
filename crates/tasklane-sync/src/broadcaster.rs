//! Sync broadcaster
//!
//! Consumes task lifecycle events and pushes them to every live connection
//! of the owning user, in publish order. Each frame is recorded in the
//! replay buffer before the live push, so a client reconnecting inside the
//! lookback window can catch up from its checkpoint without a full resync.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use tasklane_bus::{ConsumeError, Consumer, Delivery, IdempotencyGuard};
use tasklane_core::groups;

use crate::frames::Frame;
use crate::registry::ConnectionRegistry;
use crate::replay::{ReplayBuffer, ReplayOutcome};

/// Fans lifecycle events out to live connections.
pub struct SyncBroadcaster {
    registry: Arc<ConnectionRegistry>,
    replay: Arc<ReplayBuffer>,
    guard: Arc<IdempotencyGuard>,
}

impl SyncBroadcaster {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        replay: Arc<ReplayBuffer>,
        guard: Arc<IdempotencyGuard>,
    ) -> Self {
        Self {
            registry,
            replay,
            guard,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn replay(&self) -> &Arc<ReplayBuffer> {
        &self.replay
    }

    /// Serve a client's sync_request: frames since its checkpoint, or the
    /// instruction to perform a full resync when the window has expired.
    pub fn catch_up(&self, user_id: &str, last_event_id: Option<uuid::Uuid>) -> Vec<Frame> {
        let Some(last_event_id) = last_event_id else {
            // No checkpoint: the client starts live-only.
            return vec![];
        };
        match self.replay.replay_since(user_id, last_event_id) {
            ReplayOutcome::Frames(frames) => frames,
            ReplayOutcome::WindowExpired => vec![Frame::resync_required()],
        }
    }
}

#[async_trait]
impl Consumer for SyncBroadcaster {
    fn group(&self) -> &str {
        groups::SYNC_SERVICE
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), ConsumeError> {
        let envelope = delivery
            .envelope()
            .map_err(|e| ConsumeError::Poison(e.to_string()))?;

        // Claim so a redelivered event is neither re-buffered nor re-pushed.
        if !self
            .guard
            .claim(self.group(), envelope.id)
            .await
            .map_err(|e| ConsumeError::Transient(e.to_string()))?
        {
            return Ok(());
        }

        let user_id = envelope.partition_key().to_string();
        let frame = Frame::sync(&envelope);

        self.replay.push(&user_id, envelope.id, frame.clone());
        let sent = self.registry.broadcast_to_user(&user_id, &frame);

        debug!(
            user_id = %user_id,
            event_type = %envelope.event_type,
            connections = sent,
            "broadcast sync event"
        );
        Ok(())
    }
}
