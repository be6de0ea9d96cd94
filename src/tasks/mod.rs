//! Task tracking
//!
//! Every lifecycle operation on a cluster is recorded as a [`Task`](crate::types::Task)
//! with an ordered step log. Listings are served through opaque, server-side
//! cursors.

pub mod pagination;
pub mod tracker;

pub use pagination::{CursorStore, PageCursor};
pub use tracker::{TaskTracker, CANCELLED_MESSAGE};

/// Read-only view of the entities tasks are attached to
pub trait EntityStore: Send + Sync {
    fn contains(&self, entity_id: &str) -> bool;
}
