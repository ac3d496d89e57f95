use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "task_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Review,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Review => "REVIEW",
            TaskStatus::Completed => "COMPLETED",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts display labels as well as wire values: whitespace runs become `_`
/// before upper-casing, so "In Progress" parses as `IN_PROGRESS`.
impl FromStr for TaskStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut normalized = String::with_capacity(s.len());
        let mut in_whitespace = false;
        for c in s.chars() {
            if c.is_whitespace() {
                if !in_whitespace {
                    normalized.push('_');
                }
                in_whitespace = true;
            } else {
                normalized.extend(c.to_uppercase());
                in_whitespace = false;
            }
        }

        match normalized.as_str() {
            "TODO" => Ok(TaskStatus::Todo),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "REVIEW" => Ok(TaskStatus::Review),
            "COMPLETED" => Ok(TaskStatus::Completed),
            _ => Err(AppError::BadRequest("Invalid status value".to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "task_priority", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "LOW",
            TaskPriority::Medium => "MEDIUM",
            TaskPriority::High => "HIGH",
            TaskPriority::Urgent => "URGENT",
        }
    }

    /// Sort weight, Urgent highest.
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::Low => 1,
            TaskPriority::Medium => 2,
            TaskPriority::High => 3,
            TaskPriority::Urgent => 4,
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LOW" => Ok(TaskPriority::Low),
            "MEDIUM" => Ok(TaskPriority::Medium),
            "HIGH" => Ok(TaskPriority::High),
            "URGENT" => Ok(TaskPriority::Urgent),
            _ => Err(AppError::BadRequest("Invalid priority value".to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// A task as clients see it, with creator and assignee expanded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub due_date: DateTime<Utc>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub creator_id: Uuid,
    pub assigned_to_id: Option<Uuid>,
    pub creator: UserSummary,
    pub assigned_to: Option<UserSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// True when `user_id` created the task or is its assignee.
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.creator_id == user_id || self.assigned_to_id == Some(user_id)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.due_date < now
    }
}

/// Row shape of a task joined with its creator and assignee.
#[derive(Debug, Clone, FromRow)]
pub struct TaskRecord {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub due_date: DateTime<Utc>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub creator_id: Uuid,
    pub assigned_to_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub creator_name: String,
    pub creator_email: String,
    pub assignee_name: Option<String>,
    pub assignee_email: Option<String>,
}

impl From<TaskRecord> for Task {
    fn from(record: TaskRecord) -> Self {
        let assigned_to = match (record.assigned_to_id, record.assignee_name, record.assignee_email) {
            (Some(id), Some(name), Some(email)) => Some(UserSummary { id, name, email }),
            _ => None,
        };

        Self {
            id: record.id,
            title: record.title,
            description: record.description,
            due_date: record.due_date,
            priority: record.priority,
            status: record.status,
            creator_id: record.creator_id,
            assigned_to_id: record.assigned_to_id,
            creator: UserSummary {
                id: record.creator_id,
                name: record.creator_name,
                email: record.creator_email,
            },
            assigned_to,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
