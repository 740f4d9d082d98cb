// PostgreSQL implementation of the storage traits

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use tasklane_core::{
    ActivityFilter, ActivityLogEntry, ActivityPage, NewTask, RecurrencePattern, Reminder,
    ReminderStatus, Task,
};

use crate::models::{ActivityRow, RecurrencePatternRow, ReminderRow, TaskRow};
use crate::store::{ActivityStore, StoreError, TaskStore};

const REMINDER_COLUMNS: &str = "id, task_id, user_id, scheduled_time, status, delivery_channel, retry_count, sent_at, error_message, created_at";
const TASK_COLUMNS: &str = "id, user_id, title, description, due_date, priority, is_complete, tags, recurrence_id, parent_task_id, reminder_offset_minutes, created_at";

/// PostgreSQL-backed task-store boundary and activity log.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a connection pool from a database URL.
    pub async fn from_url(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

#[async_trait]
impl TaskStore for PostgresStore {
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Task::try_from).transpose()
    }

    async fn create_task(&self, fields: NewTask) -> Result<Task, StoreError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            INSERT INTO tasks (id, user_id, title, description, due_date, priority, is_complete, tags, recurrence_id, parent_task_id, reminder_offset_minutes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7, $8, $9, $10, now())
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&fields.user_id)
        .bind(&fields.title)
        .bind(&fields.description)
        .bind(fields.due_date)
        .bind(fields.priority.to_string())
        .bind(&fields.tags)
        .bind(fields.recurrence_id)
        .bind(fields.parent_task_id)
        .bind(fields.reminder_offset_minutes)
        .fetch_one(&self.pool)
        .await?;

        Task::try_from(row)
    }

    async fn get_recurrence_pattern(
        &self,
        id: Uuid,
    ) -> Result<Option<RecurrencePattern>, StoreError> {
        let row = sqlx::query_as::<_, RecurrencePatternRow>(
            r#"
            SELECT id, user_id, kind, repeat_interval, days_of_week, day_of_month, month_of_year, end_date, created_at
            FROM recurrence_patterns
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RecurrencePattern::try_from).transpose()
    }

    async fn get_reminder(&self, id: Uuid) -> Result<Option<Reminder>, StoreError> {
        let row = sqlx::query_as::<_, ReminderRow>(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Reminder::try_from).transpose()
    }

    async fn schedule_reminder(
        &self,
        task: &Task,
        channel: &str,
    ) -> Result<Option<Reminder>, StoreError> {
        let Some(reminder) = Reminder::for_task(task, channel) else {
            return Ok(None);
        };

        // Update the existing pending reminder in place, keeping at most
        // one non-terminal reminder per task.
        let updated = sqlx::query_as::<_, ReminderRow>(&format!(
            r#"
            UPDATE reminders
            SET scheduled_time = $2, delivery_channel = $3
            WHERE task_id = $1 AND status = 'pending'
            RETURNING {REMINDER_COLUMNS}
            "#
        ))
        .bind(task.id)
        .bind(reminder.scheduled_time)
        .bind(&reminder.delivery_channel)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return Ok(Some(Reminder::try_from(row)?));
        }

        let row = sqlx::query_as::<_, ReminderRow>(&format!(
            r#"
            INSERT INTO reminders (id, task_id, user_id, scheduled_time, status, delivery_channel, retry_count, created_at)
            VALUES ($1, $2, $3, $4, 'pending', $5, 0, now())
            RETURNING {REMINDER_COLUMNS}
            "#
        ))
        .bind(reminder.id)
        .bind(reminder.task_id)
        .bind(&reminder.user_id)
        .bind(reminder.scheduled_time)
        .bind(&reminder.delivery_channel)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(Reminder::try_from(row)?))
    }

    async fn get_due_reminders(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Reminder>, StoreError> {
        let rows = sqlx::query_as::<_, ReminderRow>(&format!(
            r#"
            SELECT {REMINDER_COLUMNS}
            FROM reminders
            WHERE status = 'pending' AND scheduled_time <= $1
            ORDER BY scheduled_time
            LIMIT $2
            "#
        ))
        .bind(before)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Reminder::try_from).collect()
    }

    async fn transition_reminder(
        &self,
        id: Uuid,
        from: ReminderStatus,
        to: ReminderStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE reminders SET status = $3 WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_reminder_sent(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE reminders
            SET status = 'sent', sent_at = now()
            WHERE id = $1 AND status NOT IN ('sent', 'cancelled', 'failed')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_reminder_failed(&self, id: Uuid, error: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE reminders
            SET status = 'failed', retry_count = retry_count + 1, error_message = $2
            WHERE id = $1 AND status NOT IN ('sent', 'cancelled', 'failed')
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel_pending_reminder(&self, task_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE reminders SET status = 'cancelled' WHERE task_id = $1 AND status = 'pending'",
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() >= 1)
    }
}

#[async_trait]
impl ActivityStore for PostgresStore {
    async fn append(&self, entry: ActivityLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO activity_log (id, user_id, event_type, entity_type, entity_id, occurred_at, details, correlation_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.user_id)
        .bind(&entry.event_type)
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(entry.timestamp)
        .bind(&entry.details)
        .bind(&entry.correlation_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query(
        &self,
        filter: &ActivityFilter,
        page: u32,
        limit: u32,
    ) -> Result<ActivityPage, StoreError> {
        let page = page.max(1);
        let limit = limit.max(1);
        let offset = i64::from(page - 1) * i64::from(limit);

        // Optional filters collapse via `IS NULL` so one statement covers
        // every filter combination.
        const WHERE_CLAUSE: &str = r#"
            WHERE user_id = $1
              AND ($2::text IS NULL OR entity_type = $2)
              AND ($3::uuid IS NULL OR entity_id = $3)
              AND ($4::text IS NULL OR event_type = $4)
              AND ($5::timestamptz IS NULL OR occurred_at >= $5)
              AND ($6::timestamptz IS NULL OR occurred_at <= $6)
        "#;

        let total_items: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM activity_log {WHERE_CLAUSE}"
        ))
        .bind(&filter.user_id)
        .bind(&filter.entity_type)
        .bind(filter.entity_id)
        .bind(&filter.event_type)
        .bind(filter.start)
        .bind(filter.end)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, ActivityRow>(&format!(
            r#"
            SELECT id, user_id, event_type, entity_type, entity_id, occurred_at, details, correlation_id
            FROM activity_log
            {WHERE_CLAUSE}
            ORDER BY occurred_at DESC
            LIMIT $7 OFFSET $8
            "#
        ))
        .bind(&filter.user_id)
        .bind(&filter.entity_type)
        .bind(filter.entity_id)
        .bind(&filter.event_type)
        .bind(filter.start)
        .bind(filter.end)
        .bind(i64::from(limit))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(ActivityPage {
            entries: rows.into_iter().map(ActivityLogEntry::from).collect(),
            page,
            limit,
            total_items: total_items.max(0) as u64,
        })
    }
}
