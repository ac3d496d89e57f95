use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;
use uuid::Uuid;

use crate::{
    error::AppError,
    task::{Task, TaskPriority, TaskStatus},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortBy {
    #[default]
    DueDate,
    Priority,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortBy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dueDate" => Ok(SortBy::DueDate),
            "priority" => Ok(SortBy::Priority),
            "createdAt" => Ok(SortBy::CreatedAt),
            _ => Err(AppError::BadRequest("Invalid sort field".into())),
        }
    }
}

impl FromStr for SortOrder {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            _ => Err(AppError::BadRequest("Invalid sort order".into())),
        }
    }
}

/// Task list view settings. `None` filters mean "all".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFilters {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub search: Option<String>,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
}

impl TaskFilters {
    pub fn apply(&self, tasks: &[Task]) -> Vec<Task> {
        let needle = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut result: Vec<Task> = tasks
            .iter()
            .filter(|task| needle.as_deref().map_or(true, |n| matches_search(task, n)))
            .filter(|task| self.status.map_or(true, |s| task.status == s))
            .filter(|task| self.priority.map_or(true, |p| task.priority == p))
            .cloned()
            .collect();

        // sort_by is stable, equal keys keep their incoming order
        result.sort_by(|a, b| {
            let ordering = compare(self.sort_by, a, b);
            match self.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        result
    }
}

fn matches_search(task: &Task, needle: &str) -> bool {
    task.title.to_lowercase().contains(needle) || task.description.to_lowercase().contains(needle)
}

fn compare(sort_by: SortBy, a: &Task, b: &Task) -> Ordering {
    match sort_by {
        SortBy::DueDate => a.due_date.cmp(&b.due_date),
        SortBy::Priority => b.priority.rank().cmp(&a.priority.rank()),
        SortBy::CreatedAt => b.created_at.cmp(&a.created_at),
    }
}

pub fn assigned_to(tasks: &[Task], viewer: Uuid) -> Vec<Task> {
    tasks
        .iter()
        .filter(|task| task.assigned_to_id == Some(viewer))
        .cloned()
        .collect()
}

pub fn created_by(tasks: &[Task], viewer: Uuid) -> Vec<Task> {
    tasks
        .iter()
        .filter(|task| task.creator_id == viewer)
        .cloned()
        .collect()
}

/// Tasks assigned to the viewer whose due date has passed.
pub fn overdue_for(tasks: &[Task], viewer: Uuid, now: DateTime<Utc>) -> Vec<Task> {
    tasks
        .iter()
        .filter(|task| task.assigned_to_id == Some(viewer) && task.is_overdue(now))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub assigned: usize,
    pub overdue: usize,
    pub created: usize,
}

impl DashboardStats {
    pub fn compute(tasks: &[Task], viewer: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            assigned: assigned_to(tasks, viewer).len(),
            overdue: overdue_for(tasks, viewer, now).len(),
            created: created_by(tasks, viewer).len(),
        }
    }
}
