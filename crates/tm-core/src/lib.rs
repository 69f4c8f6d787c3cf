//! Core domain model for taskmirror: error taxonomy, source and destination
//! records, durable sync state, and the trait contracts the engine is built
//! against. Everything here is wire-format agnostic; the HTTP shapes live in
//! the adapter implementations.

pub mod error;
pub mod model;
pub mod traits;

pub use error::{TmError, TmResult};
pub use model::*;
pub use traits::{
    DestApi, ProjectMutator, SourceApi, StateStore, TaskMutator, TaskStateFilter,
};
