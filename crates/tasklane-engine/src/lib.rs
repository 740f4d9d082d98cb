//! # Lifecycle Engine
//!
//! The consumers driven off the task event stream. Each runs independently
//! against its own consumer group and coordinates with the others only
//! through the bus, the task-store boundary, and the idempotency guard.
//!
//! ```text
//! task-store ──task.events──▶ ┌──────────────────────┐
//!                             │ RecurrenceEngine     │──create_task──▶ task-store
//!                             │ ReminderCancellation │──cancel───────▶ task-store
//!                             │ ActivityLogConsumer  │──append───────▶ activity log
//!                             └──────────────────────┘
//! ReminderScheduler ──reminder.due──▶ NotificationDispatcher ──deliver──▶ channel
//!                                        │
//!                                        ├─ notification.sent / notification.failed
//!                                        └─ notification.dlq (exhausted)
//! ```

pub mod activity;
pub mod channel;
pub mod dispatcher;
pub mod recurrence;
pub mod scheduler;

pub use activity::ActivityLogConsumer;
pub use channel::{
    ChannelRouter, DeliveryChannel, DeliveryOutcome, NotificationMessage, WebhookChannel,
    WebhookConfig,
};
pub use dispatcher::{DispatcherConfig, NotificationDispatcher, ReminderCancellation};
pub use recurrence::RecurrenceEngine;
pub use scheduler::{ReminderScheduler, SchedulerConfig};

#[cfg(feature = "testing")]
pub use channel::MockChannel;
