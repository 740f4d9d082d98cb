//! Reminder scheduler
//!
//! A periodic scan rather than per-reminder timers: every tick queries the
//! task-store for pending reminders whose scheduled time has passed,
//! publishes reminder.due for each, and conditionally advances the row to
//! `fired` so the next tick skips it. Safe to run in multiple processes:
//! the pending-to-fired transition is a conditional write and exactly one
//! instance wins each race.
//!
//! Failure semantics: a query failure only delays reminders to the next
//! tick; a publish failure leaves the reminder pending for re-scan, and
//! the resulting duplicate publish is absorbed downstream by the
//! idempotency guard.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tasklane_bus::Publisher;
use tasklane_core::{
    envelope::SOURCE_SCHEDULER, Envelope, ReminderDueData, ReminderStatus, Topic,
};
use tasklane_store::TaskStore;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Scan interval (the acceptable reminder latency)
    pub interval: Duration,

    /// Maximum reminders processed per tick
    pub batch_size: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

impl SchedulerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Time-triggered producer of reminder.due events.
pub struct ReminderScheduler {
    store: Arc<dyn TaskStore>,
    publisher: Publisher,
    config: SchedulerConfig,
}

impl ReminderScheduler {
    pub fn new(store: Arc<dyn TaskStore>, publisher: Publisher) -> Self {
        Self {
            store,
            publisher,
            config: SchedulerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the periodic scan loop until shutdown.
    pub fn spawn(self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            info!(interval_secs = self.config.interval.as_secs(), "reminder scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.tick().await {
                            Ok(fired) if fired > 0 => {
                                info!(fired, "reminder scan complete");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                // No data loss: the reminders stay pending
                                // and the next tick retries.
                                error!(error = %e, "reminder scan failed");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("reminder scheduler: shutdown requested");
                        break;
                    }
                }
            }
        })
    }

    /// Run one scan, returning how many reminders were fired.
    pub async fn tick(&self) -> Result<u32, tasklane_store::StoreError> {
        let due = self
            .store
            .get_due_reminders(Utc::now(), self.config.batch_size)
            .await?;

        let mut fired = 0;
        for reminder in due {
            let task = match self.store.get_task(reminder.task_id).await {
                Ok(task) => task,
                Err(e) => {
                    warn!(reminder_id = %reminder.id, error = %e, "task lookup failed, retrying next tick");
                    continue;
                }
            };

            // Stale reminders resolve to cancelled instead of firing.
            let Some(task) = task else {
                warn!(reminder_id = %reminder.id, task_id = %reminder.task_id, "task not found, cancelling reminder");
                self.cancel(&reminder).await;
                continue;
            };
            if task.is_complete {
                debug!(reminder_id = %reminder.id, "task already completed, cancelling reminder");
                self.cancel(&reminder).await;
                continue;
            }
            let Some(due_date) = task.due_date else {
                warn!(reminder_id = %reminder.id, "task lost its due date, cancelling reminder");
                self.cancel(&reminder).await;
                continue;
            };

            let envelope = Envelope::new(
                SOURCE_SCHEDULER,
                ReminderDueData {
                    reminder_id: reminder.id,
                    task_id: task.id,
                    user_id: task.user_id.clone(),
                    task_title: task.title.clone(),
                    task_due_date: due_date,
                    delivery_channel: reminder.delivery_channel.clone(),
                    attempt: reminder.retry_count + 1,
                },
            );

            // Publish before transitioning: a crash between the two leaves
            // the reminder pending and the duplicate publish is harmless.
            if let Err(e) = self.publisher.publish(Topic::ReminderDue, &envelope).await {
                warn!(reminder_id = %reminder.id, error = %e, "publish failed, reminder stays pending");
                continue;
            }

            match self
                .store
                .transition_reminder(reminder.id, ReminderStatus::Pending, ReminderStatus::Fired)
                .await
            {
                Ok(true) => fired += 1,
                Ok(false) => {
                    // Another scheduler instance won the race.
                    debug!(reminder_id = %reminder.id, "reminder already transitioned elsewhere");
                }
                Err(e) => {
                    warn!(reminder_id = %reminder.id, error = %e, "transition failed, duplicate fire possible");
                }
            }
        }

        Ok(fired)
    }

    async fn cancel(&self, reminder: &tasklane_core::Reminder) {
        if let Err(e) = self
            .store
            .transition_reminder(reminder.id, ReminderStatus::Pending, ReminderStatus::Cancelled)
            .await
        {
            warn!(reminder_id = %reminder.id, error = %e, "failed to cancel stale reminder");
        }
    }
}
