//! # Real-time Sync
//!
//! Keeps every live session of a user consistent: task lifecycle events
//! are fanned out to all of that user's connections in publish order, and
//! brief disconnects are bridged by replaying from a bounded lookback
//! buffer keyed to the client's last delivered event id. Clients whose
//! checkpoint has aged out of the window are told to perform a full
//! resync through the task-store surface instead.

pub mod broadcaster;
pub mod frames;
pub mod in_app;
pub mod registry;
pub mod replay;

pub use broadcaster::SyncBroadcaster;
pub use frames::{ClientMessage, Frame, SyncRequestData};
pub use in_app::InAppChannel;
pub use registry::ConnectionRegistry;
pub use replay::{ReplayBuffer, ReplayOutcome};
