use crate::{db::DbTransaction, error::Result};
use sqlx::PgPool;
use uuid::Uuid;
use super::notification_models::Notification;

#[derive(Clone)]
pub struct NotificationRepository {
    pool: PgPool,
}

impl NotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_all_by_user(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        let notifications = sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE user_id = $1 ORDER BY created_at DESC"
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }

    pub async fn mark_as_read(&self, id: Uuid, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query("UPDATE notifications SET read = true WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn mark_all_as_read(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query("UPDATE notifications SET read = true WHERE user_id = $1 AND read = false")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn count_unread(&self, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND read = false"
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    pub async fn create_with_tx(
        &self,
        tx: &mut DbTransaction<'_>,
        user_id: Uuid,
        task_id: Uuid,
        message: &str,
    ) -> Result<Notification> {
        let notification = sqlx::query_as::<_, Notification>(
            "INSERT INTO notifications (user_id, task_id, message)
             VALUES ($1, $2, $3)
             RETURNING *"
        )
        .bind(user_id)
        .bind(task_id)
        .bind(message)
        .fetch_one(&mut **tx)
        .await?;

        Ok(notification)
    }
}
