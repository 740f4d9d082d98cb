// Task boundary types
//
// Tasks themselves are owned by the external task-store service; these are
// the DTOs exchanged across that boundary. A task created by the recurrence
// engine links back to the root of its chain via parent_task_id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

/// A task as read from the task-store boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Task {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: TaskPriority,
    pub is_complete: bool,
    pub tags: Vec<String>,
    pub recurrence_id: Option<Uuid>,
    pub parent_task_id: Option<Uuid>,
    pub reminder_offset_minutes: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// The root of this task's recurrence chain: the parent if one is
    /// recorded, otherwise the task itself.
    pub fn chain_root(&self) -> Uuid {
        self.parent_task_id.unwrap_or(self.id)
    }
}

/// Fields for creating a task through the task-store boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: TaskPriority,
    pub tags: Vec<String>,
    pub recurrence_id: Option<Uuid>,
    pub parent_task_id: Option<Uuid>,
    pub reminder_offset_minutes: Option<i64>,
}

impl NewTask {
    /// The next instance of a recurring task: same content, new due date,
    /// chained to the root of the completed task.
    pub fn next_occurrence_of(completed: &Task, due_date: DateTime<Utc>) -> Self {
        Self {
            user_id: completed.user_id.clone(),
            title: completed.title.clone(),
            description: completed.description.clone(),
            due_date: Some(due_date),
            priority: completed.priority,
            tags: completed.tags.clone(),
            recurrence_id: completed.recurrence_id,
            parent_task_id: Some(completed.chain_root()),
            reminder_offset_minutes: completed.reminder_offset_minutes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(parent: Option<Uuid>) -> Task {
        Task {
            id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            title: "water plants".to_string(),
            description: String::new(),
            due_date: Some(Utc::now()),
            priority: TaskPriority::Low,
            is_complete: true,
            tags: vec!["home".to_string()],
            recurrence_id: Some(Uuid::new_v4()),
            parent_task_id: parent,
            reminder_offset_minutes: Some(30),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_chain_root_without_parent() {
        let t = task(None);
        assert_eq!(t.chain_root(), t.id);
    }

    #[test]
    fn test_next_occurrence_chains_to_root() {
        let root = Uuid::new_v4();
        let t = task(Some(root));
        let due = Utc::now();

        let next = NewTask::next_occurrence_of(&t, due);

        assert_eq!(next.parent_task_id, Some(root));
        assert_eq!(next.title, t.title);
        assert_eq!(next.recurrence_id, t.recurrence_id);
        assert_eq!(next.due_date, Some(due));
    }

    #[test]
    fn test_priority_display() {
        assert_eq!(TaskPriority::Urgent.to_string(), "urgent");
        let json = serde_json::to_string(&TaskPriority::High).unwrap();
        assert_eq!(json, "\"high\"");
    }
}
