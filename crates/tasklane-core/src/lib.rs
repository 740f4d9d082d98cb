// Tasklane type contracts
//
// This crate is the source of truth for the data structures shared across
// the workspace: the event envelope and its payload types, the topic
// catalog, the domain entities (tasks, reminders, recurrence patterns,
// activity entries), and the pure recurrence computation. It has no
// runtime dependencies beyond serde/uuid/chrono so every other crate can
// depend on it freely.

pub mod activity;
pub mod envelope;
pub mod recurrence;
pub mod reminder;
pub mod task;
pub mod topics;

pub use activity::{ActivityFilter, ActivityLogEntry, ActivityPage};
pub use envelope::{
    Envelope, EventData, NotificationFailedData, NotificationSentData, ReminderDueData,
    TaskCompletedData, TaskCreatedData, TaskDeletedData, TaskUpdatedData,
};
pub use recurrence::{RecurrenceKind, RecurrencePattern};
pub use reminder::{Reminder, ReminderStatus};
pub use task::{NewTask, Task, TaskPriority};
pub use topics::{groups, Topic};
