use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    error::{AppError, Result},
    notification::NotificationService,
    user::UserRepository,
    websocket::EventBroadcaster,
};
use super::{
    task_dto::{CreateTaskRequest, UpdateTaskRequest, UserTasksResponse},
    task_models::{Task, TaskPriority, TaskStatus},
    task_repository::{TaskFields, TaskRepository},
};

/// Service layer for task business rules and the events they trigger.
#[derive(Clone)]
pub struct TaskService {
    db: DbPool,
    repo: TaskRepository,
    users: UserRepository,
    notifications: NotificationService,
    broadcaster: EventBroadcaster,
}

impl TaskService {
    pub fn new(
        db: DbPool,
        repo: TaskRepository,
        users: UserRepository,
        notifications: NotificationService,
        broadcaster: EventBroadcaster,
    ) -> Self {
        Self {
            db,
            repo,
            users,
            notifications,
            broadcaster,
        }
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<UserTasksResponse> {
        let now = Utc::now();
        let (assigned_to_me, created_by_me, overdue) = tokio::try_join!(
            self.repo.find_assigned_to(user_id),
            self.repo.find_created_by(user_id),
            self.repo.find_overdue_for(user_id, now),
        )?;

        Ok(UserTasksResponse {
            assigned_to_me,
            created_by_me,
            overdue,
        })
    }

    pub async fn create_task(&self, creator_id: Uuid, payload: CreateTaskRequest) -> Result<Task> {
        let fields = new_task_fields(payload)?;

        if let Some(assignee) = fields.assigned_to_id {
            self.ensure_user_exists(assignee).await?;
        }

        // The task and its assignment notification commit together
        let mut tx = self.db.begin().await?;
        let task = self.repo.create_with_tx(&mut tx, creator_id, &fields).await?;

        let notification = match task.assigned_to_id {
            Some(assignee) if assignee != creator_id => Some(
                self.notifications
                    .notify_assignment(&mut tx, assignee, task.id, &task.title)
                    .await?,
            ),
            _ => None,
        };
        tx.commit().await?;
        tracing::info!("Task {} created by {}", task.id, creator_id);

        self.broadcaster.task_created(&task, notification.as_ref());

        Ok(task)
    }

    /// Applies a partial update to the row as it stands under lock, so
    /// concurrent updates touching different fields both survive.
    pub async fn update_task(
        &self,
        actor_id: Uuid,
        task_id: Uuid,
        payload: UpdateTaskRequest,
    ) -> Result<Task> {
        let mut tx = self.db.begin().await?;
        let existing = self
            .repo
            .lock_by_id(&mut tx, task_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Task not found".into()))?;
        ensure_can_update(&existing, actor_id)?;

        let fields = updated_task_fields(&existing, payload)?;
        let reassigned = fields.assigned_to_id != existing.assigned_to_id;

        if let (true, Some(assignee)) = (reassigned, fields.assigned_to_id) {
            self.ensure_user_exists(assignee).await?;
        }

        let task = self
            .repo
            .update_with_tx(&mut tx, task_id, &fields)
            .await?
            .ok_or_else(|| AppError::NotFound("Task not found".into()))?;

        let previous_assignee = if reassigned { existing.assigned_to_id } else { None };
        let notification = match task.assigned_to_id {
            Some(assignee) if reassigned && assignee != actor_id => Some(
                self.notifications
                    .notify_assignment(&mut tx, assignee, task.id, &task.title)
                    .await?,
            ),
            _ => None,
        };
        tx.commit().await?;

        self.broadcaster
            .task_updated(&task, previous_assignee, notification.as_ref());

        Ok(task)
    }

    pub async fn delete_task(&self, actor_id: Uuid, task_id: Uuid) -> Result<()> {
        let task = self.find(task_id).await?;
        ensure_can_delete(&task, actor_id)?;

        if self.repo.delete(task_id).await? == 0 {
            return Err(AppError::NotFound("Task not found".into()));
        }
        tracing::info!("Task {} deleted by {}", task_id, actor_id);

        self.broadcaster.task_deleted(&task);

        Ok(())
    }

    async fn find(&self, task_id: Uuid) -> Result<Task> {
        self.repo
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Task not found".into()))
    }

    async fn ensure_user_exists(&self, user_id: Uuid) -> Result<()> {
        if self.users.exists(user_id).await? {
            Ok(())
        } else {
            Err(AppError::BadRequest("Assigned user does not exist".into()))
        }
    }
}

/// Accepts RFC 3339 timestamps and plain `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_due_date(raw: &str, error_message: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| AppError::BadRequest(error_message.to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn new_task_fields(payload: CreateTaskRequest) -> Result<TaskFields> {
    payload.validate()?;

    let (Some(title), Some(due_date), Some(priority)) = (
        non_empty(payload.title),
        non_empty(payload.due_date),
        non_empty(payload.priority),
    ) else {
        return Err(AppError::BadRequest(
            "Missing required fields: title, dueDate, and priority are required".into(),
        ));
    };

    let priority: TaskPriority = priority.parse()?;
    let status = match non_empty(payload.status) {
        Some(status) => status.parse::<TaskStatus>()?,
        None => TaskStatus::default(),
    };
    let due_date = parse_due_date(
        &due_date,
        "Invalid dueDate. Please use ISO format (e.g., '2025-12-31').",
    )?;

    Ok(TaskFields {
        title,
        description: payload.description.unwrap_or_default(),
        due_date,
        priority,
        status,
        assigned_to_id: payload.assigned_to_id,
    })
}

fn updated_task_fields(existing: &Task, payload: UpdateTaskRequest) -> Result<TaskFields> {
    payload.validate()?;

    let priority = match non_empty(payload.priority) {
        Some(priority) => priority.parse::<TaskPriority>()?,
        None => existing.priority,
    };
    let status = match non_empty(payload.status) {
        Some(status) => status.parse::<TaskStatus>()?,
        None => existing.status,
    };
    let due_date = match payload.due_date {
        Some(raw) => parse_due_date(&raw, "Invalid dueDate. Please use ISO format.")?,
        None => existing.due_date,
    };

    Ok(TaskFields {
        title: payload.title.unwrap_or_else(|| existing.title.clone()),
        description: payload
            .description
            .unwrap_or_else(|| existing.description.clone()),
        due_date,
        priority,
        status,
        assigned_to_id: payload.assigned_to_id.unwrap_or(existing.assigned_to_id),
    })
}

fn ensure_can_update(task: &Task, user_id: Uuid) -> Result<()> {
    if task.involves(user_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "You don't have permission to update this task".into(),
        ))
    }
}

fn ensure_can_delete(task: &Task, user_id: Uuid) -> Result<()> {
    if task.creator_id == user_id {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Only the task creator can delete this task".into(),
        ))
    }
}
