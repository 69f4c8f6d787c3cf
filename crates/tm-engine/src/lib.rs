//! The sync orchestration engine.
//!
//! Event intake feeds a durable queue; a worker pool maps source items into
//! destination pages, resolves many-to-many relations with single-creation
//! guarantees, and persists per-item state for idempotence and echo
//! suppression. A periodic reconciler repairs webhook loss and destination
//! drift by enqueuing through the same worker path.

pub mod adapters;
pub mod backlinks;
pub mod config;
pub mod hash;
pub mod keyed_lock;
pub mod labels;
pub mod mapper;
pub mod people;
pub mod queue;
pub mod rate_limit;
pub mod reconciler;
pub mod resolver;
pub mod retry;
pub mod reverse;
pub mod testing;
pub mod worker;

pub use adapters::{NotionAdapter, TodoistAdapter};
pub use config::{DestConfig, SourceConfig, SyncConfig};
pub use queue::{QueueStats, SyncQueue};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use reconciler::{ReconcileSummary, Reconciler};
pub use resolver::{ResolvedRelations, Resolver};
pub use worker::SyncWorker;
