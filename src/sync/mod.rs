//! Client side of the real-time sync: a reconciling cache, list filters and
//! a network client that feeds the cache.

pub mod client;
pub mod filters;
pub mod store;

pub use client::SyncClient;
pub use filters::{assigned_to, created_by, overdue_for, DashboardStats, SortBy, SortOrder, TaskFilters};
pub use store::{Change, FetchToken, TaskStore};
