use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    db::DbTransaction,
    error::{AppError, Result},
};
use super::task_models::{Task, TaskPriority, TaskRecord, TaskStatus};

const SELECT_TASK: &str = "SELECT t.id, t.title, t.description, t.due_date, t.priority, t.status,
        t.creator_id, t.assigned_to_id, t.created_at, t.updated_at,
        c.name AS creator_name, c.email AS creator_email,
        a.name AS assignee_name, a.email AS assignee_email
     FROM tasks t
     JOIN users c ON c.id = t.creator_id
     LEFT JOIN users a ON a.id = t.assigned_to_id";

/// Only the task row is locked; the joined user rows stay readable.
fn lock_query() -> String {
    format!("{} WHERE t.id = $1 FOR UPDATE OF t", SELECT_TASK)
}

/// Column values of a task row, used for both inserts and full updates.
#[derive(Debug, Clone)]
pub struct TaskFields {
    pub title: String,
    pub description: String,
    pub due_date: DateTime<Utc>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub assigned_to_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct TaskRepository {
    pool: PgPool,
}

impl TaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>> {
        let record = sqlx::query_as::<_, TaskRecord>(&format!("{} WHERE t.id = $1", SELECT_TASK))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record.map(Task::from))
    }

    pub async fn find_assigned_to(&self, user_id: Uuid) -> Result<Vec<Task>> {
        self.fetch_many(
            &format!("{} WHERE t.assigned_to_id = $1 ORDER BY t.due_date ASC", SELECT_TASK),
            user_id,
            None,
        )
        .await
    }

    pub async fn find_created_by(&self, user_id: Uuid) -> Result<Vec<Task>> {
        self.fetch_many(
            &format!("{} WHERE t.creator_id = $1 ORDER BY t.due_date ASC", SELECT_TASK),
            user_id,
            None,
        )
        .await
    }

    /// Tasks the user created or is assigned to whose due date is before `now`.
    pub async fn find_overdue_for(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Task>> {
        self.fetch_many(
            &format!(
                "{} WHERE (t.creator_id = $1 OR t.assigned_to_id = $1) AND t.due_date < $2
                 ORDER BY t.due_date ASC",
                SELECT_TASK
            ),
            user_id,
            Some(now),
        )
        .await
    }

    async fn fetch_many(
        &self,
        query: &str,
        user_id: Uuid,
        now: Option<DateTime<Utc>>,
    ) -> Result<Vec<Task>> {
        let mut db_query = sqlx::query_as::<_, TaskRecord>(query).bind(user_id);

        if let Some(now) = now {
            db_query = db_query.bind(now);
        }

        let records = db_query.fetch_all(&self.pool).await?;
        Ok(records.into_iter().map(Task::from).collect())
    }

    /// Load a task and lock its row until `tx` ends, so concurrent
    /// read-modify-write updates are applied one after the other.
    pub async fn lock_by_id(&self, tx: &mut DbTransaction<'_>, id: Uuid) -> Result<Option<Task>> {
        let record = sqlx::query_as::<_, TaskRecord>(&lock_query())
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;

        Ok(record.map(Task::from))
    }

    pub async fn create_with_tx(
        &self,
        tx: &mut DbTransaction<'_>,
        creator_id: Uuid,
        fields: &TaskFields,
    ) -> Result<Task> {
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO tasks (title, description, due_date, priority, status, creator_id, assigned_to_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id"
        )
        .bind(&fields.title)
        .bind(&fields.description)
        .bind(fields.due_date)
        .bind(fields.priority)
        .bind(fields.status)
        .bind(creator_id)
        .bind(fields.assigned_to_id)
        .fetch_one(&mut **tx)
        .await?;

        self.find_with_tx(tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Task not found".into()))
    }

    pub async fn update_with_tx(
        &self,
        tx: &mut DbTransaction<'_>,
        id: Uuid,
        fields: &TaskFields,
    ) -> Result<Option<Task>> {
        let updated: Option<Uuid> = sqlx::query_scalar(
            "UPDATE tasks SET
                title = $1,
                description = $2,
                due_date = $3,
                priority = $4,
                status = $5,
                assigned_to_id = $6,
                updated_at = NOW()
             WHERE id = $7
             RETURNING id"
        )
        .bind(&fields.title)
        .bind(&fields.description)
        .bind(fields.due_date)
        .bind(fields.priority)
        .bind(fields.status)
        .bind(fields.assigned_to_id)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        match updated {
            Some(id) => self.find_with_tx(tx, id).await,
            None => Ok(None),
        }
    }

    async fn find_with_tx(&self, tx: &mut DbTransaction<'_>, id: Uuid) -> Result<Option<Task>> {
        let record = sqlx::query_as::<_, TaskRecord>(&format!("{} WHERE t.id = $1", SELECT_TASK))
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;

        Ok(record.map(Task::from))
    }

    pub async fn delete(&self, id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
