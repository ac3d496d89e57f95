pub mod broadcaster;
pub mod events;
pub mod handler;
pub mod rooms;

pub use broadcaster::EventBroadcaster;
pub use events::{ServerEvent, TaskDeletedPayload};
pub use handler::ws_handler;
pub use rooms::{ConnectionId, RoomRegistry};
