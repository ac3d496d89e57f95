use crate::{db::DbTransaction, error::Result};
use uuid::Uuid;
use super::{notification_models::Notification, notification_repository::NotificationRepository};

#[derive(Clone)]
pub struct NotificationService {
    repo: NotificationRepository,
}

impl NotificationService {
    pub fn new(repo: NotificationRepository) -> Self {
        Self { repo }
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        self.repo.find_all_by_user(user_id).await
    }

    /// Records that `user_id` was assigned `task_id`, inside the caller's
    /// task write.
    pub async fn notify_assignment(
        &self,
        tx: &mut DbTransaction<'_>,
        user_id: Uuid,
        task_id: Uuid,
        task_title: &str,
    ) -> Result<Notification> {
        let message = Notification::assignment_message(task_title);
        let notification = self.repo.create_with_tx(tx, user_id, task_id, &message).await?;
        tracing::debug!("Created assignment notification {} for user {}", notification.id, user_id);
        Ok(notification)
    }

    /// Owner-scoped; marking someone else's notification is a silent no-op.
    pub async fn mark_read(&self, user_id: Uuid, notification_id: Uuid) -> Result<()> {
        self.repo.mark_as_read(notification_id, user_id).await?;
        Ok(())
    }

    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<u64> {
        self.repo.mark_all_as_read(user_id).await
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<i64> {
        self.repo.count_unread(user_id).await
    }
}
