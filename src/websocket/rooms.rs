use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::ServerEvent;

pub type WsSender = mpsc::UnboundedSender<ServerEvent>;
pub type WsReceiver = mpsc::UnboundedReceiver<ServerEvent>;

/// Identifies one socket inside a user's room.
pub type ConnectionId = Uuid;

/// Per-user rooms: every socket a user opens joins the room keyed by their id,
/// so an event emitted to the user reaches all of their tabs.
#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Arc<DashMap<Uuid, HashMap<ConnectionId, WsSender>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
        }
    }

    /// Register a new connection in the user's room
    pub fn join(&self, user_id: Uuid) -> (ConnectionId, WsReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();

        let mut room = self.rooms.entry(user_id).or_default();
        room.insert(connection_id, tx);
        let connections = room.len();
        drop(room);

        tracing::info!(
            "User {} joined room (connection {}, {} open)",
            user_id,
            connection_id,
            connections
        );
        (connection_id, rx)
    }

    /// Remove one connection; the room goes away with its last connection
    pub fn leave(&self, user_id: Uuid, connection_id: ConnectionId) {
        let removed = self
            .rooms
            .remove_if_mut(&user_id, |_, room| {
                room.remove(&connection_id);
                room.is_empty()
            })
            .is_some();

        tracing::info!(
            "User {} left room (connection {}{})",
            user_id,
            connection_id,
            if removed { ", room closed" } else { "" }
        );
    }

    /// Send an event to every connection of a user, returning how many
    /// connections accepted it. Connections whose socket is gone are pruned.
    pub fn emit_to(&self, user_id: Uuid, event: &ServerEvent) -> usize {
        let Some(mut room) = self.rooms.get_mut(&user_id) else {
            return 0;
        };

        let mut delivered = 0;
        room.retain(|_, sender| {
            let alive = sender.send(event.clone()).is_ok();
            if alive {
                delivered += 1;
            }
            alive
        });
        let now_empty = room.is_empty();
        drop(room);

        if now_empty {
            self.rooms.remove_if(&user_id, |_, room| room.is_empty());
        }

        delivered
    }

    /// Broadcast an event to every connected socket
    pub fn emit_to_all(&self, event: &ServerEvent) -> usize {
        let users: Vec<Uuid> = self.online_users();
        users.into_iter().map(|user_id| self.emit_to(user_id, event)).sum()
    }

    pub fn online_users(&self) -> Vec<Uuid> {
        self.rooms.iter().map(|entry| *entry.key()).collect()
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.rooms.contains_key(&user_id)
    }

    pub fn connection_count(&self, user_id: Uuid) -> usize {
        self.rooms.get(&user_id).map(|room| room.len()).unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
