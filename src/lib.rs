pub mod auth;
pub mod db;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod notification;
pub mod routes;
pub mod state;
pub mod sync;
pub mod task;
pub mod user;
pub mod websocket;
