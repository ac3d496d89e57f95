use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::{
    notification::Notification,
    task::{Task, UserTasksResponse},
    websocket::{ServerEvent, TaskDeletedPayload},
};

/// Marks the moment a fetch was started. Entries pushed after the token was
/// taken survive a merge even when the fetched snapshot does not contain them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchToken {
    epoch: u64,
}

/// What a push or local echo did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    TaskAdded(Uuid),
    TaskChanged(Uuid),
    TaskRemoved(Uuid),
    NotificationAdded(Uuid),
    Unchanged,
}

/// Client-side cache of one viewer's tasks and notifications.
///
/// Fetched snapshots and pushed events arrive in any order; the store keeps a
/// single entry per id, never lets an older task version replace a newer one
/// and never resurrects a deleted task.
#[derive(Debug, Clone)]
pub struct TaskStore {
    viewer: Uuid,
    tasks: Vec<Task>,
    notifications: Vec<Notification>,
    tombstones: HashSet<Uuid>,
    // Version at which a task stopped involving the viewer
    departed: HashMap<Uuid, DateTime<Utc>>,
    epoch: u64,
    touched: HashMap<Uuid, u64>,
    // Tokens of the newest snapshots merged so far
    tasks_merged_at: u64,
    notifications_merged_at: u64,
}

impl TaskStore {
    pub fn new(viewer: Uuid) -> Self {
        Self {
            viewer,
            tasks: Vec::new(),
            notifications: Vec::new(),
            tombstones: HashSet::new(),
            departed: HashMap::new(),
            epoch: 0,
            touched: HashMap::new(),
            tasks_merged_at: 0,
            notifications_merged_at: 0,
        }
    }

    pub fn viewer(&self) -> Uuid {
        self.viewer
    }

    pub fn begin_fetch(&mut self) -> FetchToken {
        self.epoch += 1;
        FetchToken { epoch: self.epoch }
    }

    /// Merge a `/api/tasks/me` snapshot. Returns the number of tasks held
    /// afterwards. A snapshot older than one already merged is discarded.
    pub fn merge_tasks(&mut self, token: FetchToken, groups: UserTasksResponse) -> usize {
        if token.epoch < self.tasks_merged_at {
            tracing::debug!("Discarding stale task snapshot (token {})", token.epoch);
            return self.tasks.len();
        }
        self.tasks_merged_at = token.epoch;

        let mut order: Vec<Uuid> = Vec::new();
        let mut fetched: HashMap<Uuid, Task> = HashMap::new();
        for task in groups.assigned_to_me.into_iter().chain(groups.created_by_me) {
            if !fetched.contains_key(&task.id) {
                order.push(task.id);
            }
            fetched.insert(task.id, task);
        }

        let mut local: HashMap<Uuid, Task> = std::mem::take(&mut self.tasks)
            .into_iter()
            .map(|task| (task.id, task))
            .collect();

        let mut merged = Vec::with_capacity(order.len());
        for id in order {
            let Some(incoming) = fetched.remove(&id) else {
                continue;
            };
            if self.tombstones.contains(&id) || self.has_departed(&incoming) {
                continue;
            }
            self.departed.remove(&id);

            let task = match local.remove(&id) {
                Some(current) if current.updated_at > incoming.updated_at => current,
                _ => incoming,
            };
            merged.push(task);
        }

        // Local-only entries: keep the ones a push touched while fetching
        let mut survivors: Vec<Task> = local
            .into_values()
            .filter(|task| self.touched_since(task.id, token))
            .collect();
        survivors.sort_by_key(|task| std::cmp::Reverse(self.touched.get(&task.id).copied()));

        survivors.extend(merged);
        self.tasks = survivors;

        tracing::debug!("Merged task snapshot, {} tasks held", self.tasks.len());
        self.tasks.len()
    }

    /// Merge a `/api/notifications` snapshot. A notification read locally
    /// stays read; snapshots older than one already merged are discarded.
    pub fn merge_notifications(&mut self, token: FetchToken, list: Vec<Notification>) -> usize {
        if token.epoch < self.notifications_merged_at {
            tracing::debug!("Discarding stale notification snapshot (token {})", token.epoch);
            return self.notifications.len();
        }
        self.notifications_merged_at = token.epoch;

        let mut local: HashMap<Uuid, Notification> = std::mem::take(&mut self.notifications)
            .into_iter()
            .map(|n| (n.id, n))
            .collect();

        let mut seen = HashSet::new();
        let mut merged = Vec::with_capacity(list.len());
        for mut incoming in list {
            if self.tombstones.contains(&incoming.task_id) || !seen.insert(incoming.id) {
                continue;
            }
            if let Some(current) = local.remove(&incoming.id) {
                incoming.read |= current.read;
            }
            merged.push(incoming);
        }

        merged.extend(
            local
                .into_values()
                .filter(|n| self.touched_since(n.id, token)),
        );
        merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.notifications = merged;

        self.notifications.len()
    }

    pub fn apply(&mut self, event: ServerEvent) -> Change {
        match event {
            ServerEvent::TaskAssigned(task) => self.upsert(task),
            ServerEvent::TaskUpdated(task) => self.update(task),
            ServerEvent::TaskDeleted(TaskDeletedPayload { task_id }) => self.delete(task_id),
            ServerEvent::NotificationNew(notification) => self.push_notification(notification),
        }
    }

    /// Echo of a task the viewer created through the API.
    pub fn record_created(&mut self, task: Task) -> Change {
        self.upsert(task)
    }

    /// Echo of a task the viewer updated through the API.
    pub fn record_updated(&mut self, task: Task) -> Change {
        self.update(task)
    }

    pub fn record_deleted(&mut self, task_id: Uuid) -> Change {
        self.delete(task_id)
    }

    pub fn mark_read(&mut self, notification_id: Uuid) -> bool {
        match self.notifications.iter_mut().find(|n| n.id == notification_id) {
            Some(n) if !n.read => {
                n.read = true;
                true
            }
            _ => false,
        }
    }

    /// Returns how many notifications flipped to read.
    pub fn mark_all_read(&mut self) -> usize {
        let mut flipped = 0;
        for n in self.notifications.iter_mut().filter(|n| !n.read) {
            n.read = true;
            flipped += 1;
        }
        flipped
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.read).count()
    }

    pub fn is_deleted(&self, task_id: Uuid) -> bool {
        self.tombstones.contains(&task_id)
    }

    fn update(&mut self, task: Task) -> Change {
        if task.involves(self.viewer) {
            return self.upsert(task);
        }
        if self.tombstones.contains(&task.id) {
            return Change::Unchanged;
        }

        // The viewer lost access: drop it and remember which version did that
        let id = task.id;
        let departed_at = self.departed.entry(id).or_insert(task.updated_at);
        if task.updated_at > *departed_at {
            *departed_at = task.updated_at;
        }
        self.touch(id);

        match self.tasks.iter().position(|t| t.id == id) {
            Some(index) if self.tasks[index].updated_at <= task.updated_at => {
                self.tasks.remove(index);
                Change::TaskRemoved(id)
            }
            _ => Change::Unchanged,
        }
    }

    fn upsert(&mut self, task: Task) -> Change {
        if self.tombstones.contains(&task.id) || self.has_departed(&task) {
            return Change::Unchanged;
        }
        self.departed.remove(&task.id);

        let id = task.id;
        let change = match self.tasks.iter_mut().find(|t| t.id == id) {
            Some(current) if current.updated_at > task.updated_at => return Change::Unchanged,
            Some(current) if *current == task => Change::Unchanged,
            Some(current) => {
                *current = task;
                Change::TaskChanged(id)
            }
            None => {
                self.tasks.insert(0, task);
                Change::TaskAdded(id)
            }
        };
        self.touch(id);
        change
    }

    fn delete(&mut self, task_id: Uuid) -> Change {
        self.tombstones.insert(task_id);
        self.departed.remove(&task_id);
        self.touched.remove(&task_id);

        let tasks_before = self.tasks.len();
        let notifications_before = self.notifications.len();
        self.tasks.retain(|t| t.id != task_id);
        self.notifications.retain(|n| n.task_id != task_id);

        if self.tasks.len() != tasks_before || self.notifications.len() != notifications_before {
            Change::TaskRemoved(task_id)
        } else {
            Change::Unchanged
        }
    }

    fn push_notification(&mut self, notification: Notification) -> Change {
        if self.tombstones.contains(&notification.task_id)
            || self.notifications.iter().any(|n| n.id == notification.id)
        {
            return Change::Unchanged;
        }

        let id = notification.id;
        self.notifications.insert(0, notification);
        self.touch(id);
        Change::NotificationAdded(id)
    }

    fn has_departed(&self, task: &Task) -> bool {
        self.departed
            .get(&task.id)
            .is_some_and(|departed_at| task.updated_at <= *departed_at)
    }

    fn touch(&mut self, id: Uuid) {
        self.epoch += 1;
        self.touched.insert(id, self.epoch);
    }

    fn touched_since(&self, id: Uuid, token: FetchToken) -> bool {
        self.touched.get(&id).is_some_and(|epoch| *epoch > token.epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::events::fixtures;
    use chrono::Duration;

    fn groups(assigned: Vec<Task>, created: Vec<Task>) -> UserTasksResponse {
        UserTasksResponse {
            assigned_to_me: assigned,
            created_by_me: created,
            overdue: Vec::new(),
        }
    }

    fn bumped(task: &Task, minutes: i64, title: &str) -> Task {
        let mut next = task.clone();
        next.title = title.to_string();
        next.updated_at = task.updated_at + Duration::minutes(minutes);
        next
    }

    #[test]
    fn test_fetch_deduplicates_self_assigned_tasks() {
        let viewer = Uuid::new_v4();
        let mut store = TaskStore::new(viewer);
        let own = fixtures::task(viewer, Some(viewer), "Own");
        let other = fixtures::task(Uuid::new_v4(), Some(viewer), "Theirs");

        let token = store.begin_fetch();
        let held = store.merge_tasks(token, groups(vec![own.clone(), other.clone()], vec![own.clone()]));

        assert_eq!(held, 2);
        assert_eq!(store.tasks()[0].id, own.id);
        assert_eq!(store.tasks()[1].id, other.id);
    }

    #[test]
    fn test_push_during_fetch_survives_stale_snapshot() {
        let viewer = Uuid::new_v4();
        let mut store = TaskStore::new(viewer);
        let token = store.begin_fetch();

        let pushed = fixtures::task(Uuid::new_v4(), Some(viewer), "Fresh");
        assert_eq!(
            store.apply(ServerEvent::TaskAssigned(pushed.clone())),
            Change::TaskAdded(pushed.id)
        );

        store.merge_tasks(token, groups(vec![], vec![]));
        assert!(store.task(pushed.id).is_some());
    }

    #[test]
    fn test_entries_missing_from_later_fetch_are_dropped() {
        let viewer = Uuid::new_v4();
        let mut store = TaskStore::new(viewer);
        let task = fixtures::task(viewer, None, "Gone elsewhere");
        store.apply(ServerEvent::TaskUpdated(task.clone()));

        let token = store.begin_fetch();
        store.merge_tasks(token, groups(vec![], vec![]));
        assert!(store.task(task.id).is_none());
    }

    #[test]
    fn test_newer_local_version_beats_stale_fetch() {
        let viewer = Uuid::new_v4();
        let mut store = TaskStore::new(viewer);
        let original = fixtures::task(viewer, None, "v1");
        let token = store.begin_fetch();

        let newer = bumped(&original, 5, "v2");
        store.apply(ServerEvent::TaskUpdated(newer));
        store.merge_tasks(token, groups(vec![], vec![original.clone()]));

        assert_eq!(store.task(original.id).unwrap().title, "v2");
        assert_eq!(store.tasks().len(), 1);
    }

    #[test]
    fn test_fetch_wins_ties() {
        let viewer = Uuid::new_v4();
        let mut store = TaskStore::new(viewer);
        let local = fixtures::task(viewer, None, "local");
        store.record_created(local.clone());

        let mut fetched = local.clone();
        fetched.title = "server".into();
        let token = store.begin_fetch();
        store.merge_tasks(token, groups(vec![], vec![fetched]));

        assert_eq!(store.task(local.id).unwrap().title, "server");
    }

    #[test]
    fn test_older_push_is_ignored() {
        let viewer = Uuid::new_v4();
        let mut store = TaskStore::new(viewer);
        let v1 = fixtures::task(viewer, None, "v1");
        let v2 = bumped(&v1, 1, "v2");

        store.apply(ServerEvent::TaskUpdated(v2.clone()));
        assert_eq!(store.apply(ServerEvent::TaskUpdated(v1)), Change::Unchanged);
        assert_eq!(store.task(v2.id).unwrap().title, "v2");
    }

    #[test]
    fn test_update_replaces_in_place() {
        let viewer = Uuid::new_v4();
        let mut store = TaskStore::new(viewer);
        let first = fixtures::task(viewer, None, "first");
        let second = fixtures::task(viewer, None, "second");
        store.record_created(first.clone());
        store.record_created(second.clone());

        let renamed = bumped(&first, 1, "first, renamed");
        assert_eq!(
            store.apply(ServerEvent::TaskUpdated(renamed)),
            Change::TaskChanged(first.id)
        );
        let titles: Vec<&str> = store.tasks().iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["second", "first, renamed"]);
    }

    #[test]
    fn test_reassignment_away_removes_task() {
        let viewer = Uuid::new_v4();
        let creator = Uuid::new_v4();
        let mut store = TaskStore::new(viewer);
        let task = fixtures::task(creator, Some(viewer), "Handover");
        store.apply(ServerEvent::TaskAssigned(task.clone()));

        let mut moved = bumped(&task, 1, "Handover");
        moved.assigned_to_id = Some(Uuid::new_v4());
        assert_eq!(
            store.apply(ServerEvent::TaskUpdated(moved)),
            Change::TaskRemoved(task.id)
        );

        // A snapshot taken before the reassignment must not bring it back
        let token = store.begin_fetch();
        store.merge_tasks(token, groups(vec![task.clone()], vec![]));
        assert!(store.task(task.id).is_none());

        // Being assigned again later does
        let mut back = bumped(&task, 2, "Handover");
        back.assigned_to_id = Some(viewer);
        assert_eq!(
            store.apply(ServerEvent::TaskAssigned(back)),
            Change::TaskAdded(task.id)
        );
    }

    #[test]
    fn test_deleted_task_never_reappears() {
        let viewer = Uuid::new_v4();
        let mut store = TaskStore::new(viewer);
        let task = fixtures::task(Uuid::new_v4(), Some(viewer), "Doomed");
        let notification = fixtures::notification(viewer, &task);
        let token = store.begin_fetch();

        store.apply(ServerEvent::TaskAssigned(task.clone()));
        store.apply(ServerEvent::NotificationNew(notification.clone()));
        assert_eq!(
            store.apply(ServerEvent::TaskDeleted(TaskDeletedPayload { task_id: task.id })),
            Change::TaskRemoved(task.id)
        );
        assert!(store.notifications().is_empty());

        store.merge_tasks(token, groups(vec![task.clone()], vec![]));
        store.merge_notifications(token, vec![notification.clone()]);
        assert!(store.task(task.id).is_none());
        assert!(store.notifications().is_empty());

        assert_eq!(store.apply(ServerEvent::TaskUpdated(bumped(&task, 9, "Zombie"))), Change::Unchanged);
        assert_eq!(store.apply(ServerEvent::NotificationNew(notification)), Change::Unchanged);
        assert!(store.is_deleted(task.id));
    }

    #[test]
    fn test_duplicate_notification_push_is_ignored() {
        let viewer = Uuid::new_v4();
        let mut store = TaskStore::new(viewer);
        let task = fixtures::task(Uuid::new_v4(), Some(viewer), "Ping");
        let notification = fixtures::notification(viewer, &task);

        assert_eq!(
            store.apply(ServerEvent::NotificationNew(notification.clone())),
            Change::NotificationAdded(notification.id)
        );
        assert_eq!(store.apply(ServerEvent::NotificationNew(notification)), Change::Unchanged);
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn test_local_read_flag_survives_fetch() {
        let viewer = Uuid::new_v4();
        let mut store = TaskStore::new(viewer);
        let task = fixtures::task(Uuid::new_v4(), Some(viewer), "Ping");
        let notification = fixtures::notification(viewer, &task);

        let token = store.begin_fetch();
        store.merge_notifications(token, vec![notification.clone()]);
        let stale = store.begin_fetch();
        assert!(store.mark_read(notification.id));

        store.merge_notifications(stale, vec![notification.clone()]);
        assert!(store.notifications()[0].read);
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn test_notifications_sorted_newest_first() {
        let viewer = Uuid::new_v4();
        let mut store = TaskStore::new(viewer);
        let task = fixtures::task(Uuid::new_v4(), Some(viewer), "Ping");
        let older = fixtures::notification(viewer, &task);
        let mut newer = fixtures::notification(viewer, &task);
        newer.created_at = older.created_at + Duration::minutes(1);

        let token = store.begin_fetch();
        store.merge_notifications(token, vec![older.clone(), newer.clone()]);
        assert_eq!(store.notifications()[0].id, newer.id);

        assert!(!store.mark_read(Uuid::new_v4()));
        assert_eq!(store.mark_all_read(), 2);
        assert_eq!(store.mark_all_read(), 0);
    }

    #[test]
    fn test_overlapping_refreshes_keep_the_newer_snapshot() {
        let viewer = Uuid::new_v4();
        let mut store = TaskStore::new(viewer);
        let task = fixtures::task(Uuid::new_v4(), Some(viewer), "Created between fetches");
        let notification = fixtures::notification(viewer, &task);

        let older = store.begin_fetch();
        let newer = store.begin_fetch();

        store.merge_tasks(newer, groups(vec![task.clone()], vec![]));
        store.merge_notifications(newer, vec![notification.clone()]);

        assert_eq!(store.merge_tasks(older, groups(vec![], vec![])), 1);
        assert_eq!(store.merge_notifications(older, vec![]), 1);
        assert!(store.task(task.id).is_some());
        assert_eq!(store.notifications()[0].id, notification.id);
    }
}
