use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{notification::Notification, task::Task};

/// Frames pushed to clients, serialized as `{"event": "...", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "task:assigned")]
    TaskAssigned(Task),
    #[serde(rename = "task:updated")]
    TaskUpdated(Task),
    #[serde(rename = "task:deleted")]
    TaskDeleted(TaskDeletedPayload),
    #[serde(rename = "notification:new")]
    NotificationNew(Notification),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDeletedPayload {
    pub task_id: Uuid,
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::TaskAssigned(_) => "task:assigned",
            ServerEvent::TaskUpdated(_) => "task:updated",
            ServerEvent::TaskDeleted(_) => "task:deleted",
            ServerEvent::NotificationNew(_) => "notification:new",
        }
    }

    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_frame(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
