//! Durable sync-state persistence for taskmirror.
//!
//! One logical collection per entity kind (`task_state`, `project_state`),
//! keyed by source id and namespaced so multiple environments can share a
//! database file. All mutation goes through transactional read-modify-write.

pub mod sqlite;

pub use sqlite::SqliteStateStore;
