use uuid::Uuid;

use crate::{notification::Notification, task::Task};
use super::{
    events::{ServerEvent, TaskDeletedPayload},
    rooms::RoomRegistry,
};

/// Turns task and notification mutations into room events.
///
/// Every task event goes to the task's recipient set: the creator, the
/// assignee and, on reassignment, the previous assignee. Assignment events
/// only go to the new assignee.
#[derive(Clone)]
pub struct EventBroadcaster {
    rooms: RoomRegistry,
}

impl EventBroadcaster {
    pub fn new(rooms: RoomRegistry) -> Self {
        Self { rooms }
    }

    /// Creator first, then assignee, then previous assignee, without repeats.
    pub fn recipients(task: &Task, previous_assignee: Option<Uuid>) -> Vec<Uuid> {
        let mut recipients = vec![task.creator_id];
        for user_id in [task.assigned_to_id, previous_assignee].into_iter().flatten() {
            if !recipients.contains(&user_id) {
                recipients.push(user_id);
            }
        }
        recipients
    }

    pub fn task_created(&self, task: &Task, notification: Option<&Notification>) {
        self.publish_to_recipients(
            &ServerEvent::TaskUpdated(task.clone()),
            &Self::recipients(task, None),
        );

        if let Some(notification) = notification {
            self.assigned(task, notification);
        }
    }

    pub fn task_updated(
        &self,
        task: &Task,
        previous_assignee: Option<Uuid>,
        notification: Option<&Notification>,
    ) {
        self.publish_to_recipients(
            &ServerEvent::TaskUpdated(task.clone()),
            &Self::recipients(task, previous_assignee),
        );

        if let Some(notification) = notification {
            self.assigned(task, notification);
        }
    }

    pub fn task_deleted(&self, task: &Task) {
        let event = ServerEvent::TaskDeleted(TaskDeletedPayload { task_id: task.id });
        self.publish_to_recipients(&event, &Self::recipients(task, None));
    }

    fn assigned(&self, task: &Task, notification: &Notification) {
        self.publish(notification.user_id, &ServerEvent::TaskAssigned(task.clone()));
        self.publish(notification.user_id, &ServerEvent::NotificationNew(notification.clone()));
    }

    fn publish_to_recipients(&self, event: &ServerEvent, recipients: &[Uuid]) {
        for user_id in recipients {
            self.publish(*user_id, event);
        }
    }

    fn publish(&self, user_id: Uuid, event: &ServerEvent) {
        let delivered = self.rooms.emit_to(user_id, event);
        tracing::debug!(
            "Emitted {} to user {} ({} connections)",
            event.name(),
            user_id,
            delivered
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::events::fixtures;
    use crate::websocket::rooms::WsReceiver;

    fn drain(rx: &mut WsReceiver) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        names
    }

    #[test]
    fn test_recipients_deduplicate_self_assignment() {
        let creator = Uuid::new_v4();
        let task = fixtures::task(creator, Some(creator), "Solo");
        assert_eq!(EventBroadcaster::recipients(&task, None), vec![creator]);
    }

    #[test]
    fn test_recipients_include_previous_assignee() {
        let creator = Uuid::new_v4();
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        let task = fixtures::task(creator, Some(new), "Handover");

        assert_eq!(
            EventBroadcaster::recipients(&task, Some(old)),
            vec![creator, new, old]
        );
    }

    #[test]
    fn test_task_created_with_assignment() {
        let rooms = RoomRegistry::new();
        let broadcaster = EventBroadcaster::new(rooms.clone());
        let creator = Uuid::new_v4();
        let assignee = Uuid::new_v4();
        let (_, mut creator_rx) = rooms.join(creator);
        let (_, mut assignee_rx) = rooms.join(assignee);

        let task = fixtures::task(creator, Some(assignee), "Review PR");
        let notification = fixtures::notification(assignee, &task);
        broadcaster.task_created(&task, Some(&notification));

        assert_eq!(drain(&mut creator_rx), vec!["task:updated"]);
        assert_eq!(
            drain(&mut assignee_rx),
            vec!["task:updated", "task:assigned", "notification:new"]
        );
    }

    #[test]
    fn test_task_deleted_reaches_creator_and_assignee_only() {
        let rooms = RoomRegistry::new();
        let broadcaster = EventBroadcaster::new(rooms.clone());
        let creator = Uuid::new_v4();
        let assignee = Uuid::new_v4();
        let bystander = Uuid::new_v4();
        let (_, mut creator_rx) = rooms.join(creator);
        let (_, mut assignee_rx) = rooms.join(assignee);
        let (_, mut bystander_rx) = rooms.join(bystander);

        let task = fixtures::task(creator, Some(assignee), "Cleanup");
        broadcaster.task_deleted(&task);

        assert_eq!(drain(&mut creator_rx), vec!["task:deleted"]);
        assert_eq!(drain(&mut assignee_rx), vec!["task:deleted"]);
        assert!(drain(&mut bystander_rx).is_empty());
    }

    #[test]
    fn test_reassignment_informs_previous_assignee() {
        let rooms = RoomRegistry::new();
        let broadcaster = EventBroadcaster::new(rooms.clone());
        let creator = Uuid::new_v4();
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        let (_, mut old_rx) = rooms.join(old);
        let (_, mut new_rx) = rooms.join(new);

        let task = fixtures::task(creator, Some(new), "Handover");
        let notification = fixtures::notification(new, &task);
        broadcaster.task_updated(&task, Some(old), Some(&notification));

        assert_eq!(drain(&mut old_rx), vec!["task:updated"]);
        assert_eq!(
            drain(&mut new_rx),
            vec!["task:updated", "task:assigned", "notification:new"]
        );
    }

    #[test]
    fn test_offline_recipients_do_not_block_others() {
        let rooms = RoomRegistry::new();
        let broadcaster = EventBroadcaster::new(rooms.clone());
        let creator = Uuid::new_v4();
        let offline_assignee = Uuid::new_v4();
        let (_, mut creator_rx) = rooms.join(creator);

        let task = fixtures::task(creator, Some(offline_assignee), "Async");
        broadcaster.task_updated(&task, None, None);

        assert_eq!(drain(&mut creator_rx), vec!["task:updated"]);
    }
}
