use chrono::{DateTime, Duration, TimeZone, Utc};
use taskboard::{
    notification::Notification,
    sync::{overdue_for, Change, DashboardStats, SortBy, TaskFilters, TaskStore},
    task::{Task, TaskPriority, TaskStatus, UserSummary, UserTasksResponse},
    websocket::{ServerEvent, TaskDeletedPayload},
};
use uuid::Uuid;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()
}

fn person(id: Uuid, name: &str) -> UserSummary {
    UserSummary {
        id,
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
    }
}

fn task(creator: Uuid, assignee: Option<Uuid>, title: &str, due_in_days: i64) -> Task {
    Task {
        id: Uuid::new_v4(),
        title: title.to_string(),
        description: String::new(),
        due_date: now() + Duration::days(due_in_days),
        priority: TaskPriority::Medium,
        status: TaskStatus::Todo,
        creator_id: creator,
        assigned_to_id: assignee,
        creator: person(creator, "Creator"),
        assigned_to: assignee.map(|id| person(id, "Assignee")),
        created_at: now() - Duration::days(1),
        updated_at: now() - Duration::days(1),
    }
}

fn assignment(user_id: Uuid, task: &Task) -> Notification {
    Notification {
        id: Uuid::new_v4(),
        user_id,
        task_id: task.id,
        message: Notification::assignment_message(&task.title),
        read: false,
        created_at: now(),
    }
}

/// Replays the frames a signed-in user receives while the initial fetch is
/// still in flight, then lands the stale snapshot.
#[test]
fn test_push_and_fetch_race_converges() {
    let viewer = Uuid::new_v4();
    let boss = Uuid::new_v4();
    let mut store = TaskStore::new(viewer);

    let existing = task(boss, Some(viewer), "Quarterly report", -2);
    let doomed = task(boss, Some(viewer), "Old migration", 4);
    let token = store.begin_fetch();

    // Pushed while the fetch is in flight
    let fresh = task(boss, Some(viewer), "Hotfix", 1);
    let note = assignment(viewer, &fresh);
    let frames = [
        ServerEvent::TaskAssigned(fresh.clone()),
        ServerEvent::NotificationNew(note.clone()),
        ServerEvent::TaskDeleted(TaskDeletedPayload { task_id: doomed.id }),
    ];
    for frame in frames {
        let wire = frame.to_frame().unwrap();
        store.apply(ServerEvent::from_frame(&wire).unwrap());
    }

    // Snapshot taken before the push: contains the deleted task, lacks the new one
    store.merge_tasks(
        token,
        UserTasksResponse {
            assigned_to_me: vec![existing.clone(), doomed.clone()],
            created_by_me: vec![],
            overdue: vec![existing.clone()],
        },
    );
    store.merge_notifications(token, vec![]);

    let ids: Vec<Uuid> = store.tasks().iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![fresh.id, existing.id]);
    assert_eq!(store.unread_count(), 1);
    assert_eq!(store.notifications()[0].id, note.id);

    let stats = DashboardStats::compute(store.tasks(), viewer, now());
    assert_eq!(stats.assigned, 2);
    assert_eq!(stats.overdue, 1);
    assert_eq!(stats.created, 0);
    assert_eq!(overdue_for(store.tasks(), viewer, now())[0].id, existing.id);
}

#[test]
fn test_own_edits_and_pushes_do_not_duplicate() {
    let viewer = Uuid::new_v4();
    let teammate = Uuid::new_v4();
    let mut store = TaskStore::new(viewer);

    let mut created = task(viewer, Some(teammate), "Design review", 2);
    created.priority = TaskPriority::Urgent;
    assert_eq!(store.record_created(created.clone()), Change::TaskAdded(created.id));

    // The server echoes the same task back on the socket
    assert_eq!(store.apply(ServerEvent::TaskUpdated(created.clone())), Change::Unchanged);
    assert_eq!(store.tasks().len(), 1);

    let mut edited = created.clone();
    edited.status = TaskStatus::Review;
    edited.updated_at = created.updated_at + Duration::minutes(3);
    assert_eq!(store.record_updated(edited.clone()), Change::TaskChanged(created.id));

    let second = task(teammate, Some(viewer), "Pair on tests", 5);
    store.apply(ServerEvent::TaskAssigned(second.clone()));

    let by_priority = TaskFilters {
        sort_by: SortBy::Priority,
        ..Default::default()
    }
    .apply(store.tasks());
    assert_eq!(by_priority[0].id, created.id);
    assert_eq!(by_priority[0].status, TaskStatus::Review);

    assert_eq!(store.record_deleted(created.id), Change::TaskRemoved(created.id));
    assert_eq!(store.apply(ServerEvent::TaskUpdated(edited)), Change::Unchanged);
    assert_eq!(store.tasks().len(), 1);
}
