//! Replay buffer
//!
//! Keeps each user's recently broadcast frames for a bounded lookback
//! window (matching the sync.events retention). A reconnecting client
//! supplies its last delivered event id; if that id is still in the
//! buffer, everything after it is replayed before live push resumes. If
//! the window has rolled past the checkpoint, continuity cannot be proven
//! and the client is told to perform a full resync instead.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::frames::Frame;

struct BufferedFrame {
    event_id: Uuid,
    buffered_at: DateTime<Utc>,
    frame: Frame,
}

/// Outcome of a checkpoint replay request.
#[derive(Debug)]
pub enum ReplayOutcome {
    /// Frames published after the checkpoint, oldest first.
    Frames(Vec<Frame>),
    /// The checkpoint is outside the lookback window.
    WindowExpired,
}

/// Per-user ring of recent frames with a bounded lookback window.
pub struct ReplayBuffer {
    window: Duration,
    max_frames_per_user: usize,
    frames: DashMap<String, VecDeque<BufferedFrame>>,
}

impl ReplayBuffer {
    /// Default window mirrors the sync.events topic retention (one hour).
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(60 * 60))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            max_frames_per_user: 1024,
            frames: DashMap::new(),
        }
    }

    pub fn with_max_frames(mut self, max: usize) -> Self {
        self.max_frames_per_user = max.max(1);
        self
    }

    /// Record a frame as delivered to a user.
    pub fn push(&self, user_id: &str, event_id: Uuid, frame: Frame) {
        let mut buffer = self.frames.entry(user_id.to_string()).or_default();
        buffer.push_back(BufferedFrame {
            event_id,
            buffered_at: Utc::now(),
            frame,
        });
        Self::trim(&mut buffer, self.cutoff(), self.max_frames_per_user);
    }

    /// Frames published after the given checkpoint.
    pub fn replay_since(&self, user_id: &str, last_event_id: Uuid) -> ReplayOutcome {
        let Some(mut buffer) = self.frames.get_mut(user_id) else {
            return ReplayOutcome::WindowExpired;
        };
        Self::trim(&mut buffer, self.cutoff(), self.max_frames_per_user);

        let Some(position) = buffer.iter().position(|b| b.event_id == last_event_id) else {
            return ReplayOutcome::WindowExpired;
        };

        let frames = buffer
            .iter()
            .skip(position + 1)
            .map(|b| b.frame.clone())
            .collect();
        ReplayOutcome::Frames(frames)
    }

    pub fn frame_count(&self, user_id: &str) -> usize {
        self.frames
            .get(user_id)
            .map(|buffer| buffer.len())
            .unwrap_or(0)
    }

    fn cutoff(&self) -> DateTime<Utc> {
        let window = chrono::Duration::from_std(self.window)
            .unwrap_or_else(|_| chrono::Duration::days(36500));
        Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn trim(buffer: &mut VecDeque<BufferedFrame>, cutoff: DateTime<Utc>, max: usize) {
        while let Some(front) = buffer.front() {
            if front.buffered_at >= cutoff && buffer.len() <= max {
                break;
            }
            buffer.pop_front();
        }
    }
}

impl Default for ReplayBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: usize) -> Frame {
        Frame {
            frame_type: "sync".to_string(),
            data: serde_json::json!({ "n": n }),
        }
    }

    #[test]
    fn test_replay_after_checkpoint() {
        let buffer = ReplayBuffer::new();
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for (n, id) in ids.iter().enumerate() {
            buffer.push("user-1", *id, frame(n));
        }

        let ReplayOutcome::Frames(frames) = buffer.replay_since("user-1", ids[2]) else {
            panic!("expected frames");
        };
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data["n"], 3);
        assert_eq!(frames[1].data["n"], 4);
    }

    #[test]
    fn test_checkpoint_at_tip_replays_nothing() {
        let buffer = ReplayBuffer::new();
        let id = Uuid::new_v4();
        buffer.push("user-1", id, frame(0));

        let ReplayOutcome::Frames(frames) = buffer.replay_since("user-1", id) else {
            panic!("expected frames");
        };
        assert!(frames.is_empty());
    }

    #[test]
    fn test_unknown_checkpoint_requires_resync() {
        let buffer = ReplayBuffer::new();
        buffer.push("user-1", Uuid::new_v4(), frame(0));

        assert!(matches!(
            buffer.replay_since("user-1", Uuid::new_v4()),
            ReplayOutcome::WindowExpired
        ));
        // A user with no buffer at all also requires resync.
        assert!(matches!(
            buffer.replay_since("user-2", Uuid::new_v4()),
            ReplayOutcome::WindowExpired
        ));
    }

    #[test]
    fn test_expired_window_requires_resync() {
        let buffer = ReplayBuffer::with_window(Duration::from_millis(0));
        let id = Uuid::new_v4();
        buffer.push("user-1", id, frame(0));

        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(
            buffer.replay_since("user-1", id),
            ReplayOutcome::WindowExpired
        ));
    }

    #[test]
    fn test_frame_cap() {
        let buffer = ReplayBuffer::new().with_max_frames(3);
        for n in 0..10 {
            buffer.push("user-1", Uuid::new_v4(), frame(n));
        }
        assert_eq!(buffer.frame_count("user-1"), 3);
    }

    #[test]
    fn test_users_are_isolated() {
        let buffer = ReplayBuffer::new();
        let id = Uuid::new_v4();
        buffer.push("user-1", id, frame(0));
        buffer.push("user-2", Uuid::new_v4(), frame(1));

        assert!(matches!(
            buffer.replay_since("user-2", id),
            ReplayOutcome::WindowExpired
        ));
    }
}
