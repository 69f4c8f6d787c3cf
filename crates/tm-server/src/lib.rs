//! HTTP surface for taskmirror: webhook intake, queue push, reconcile
//! trigger, and health, plus the wiring that assembles the engine from
//! environment configuration.

pub mod auth;
pub mod rest;
pub mod state;

pub use rest::create_router;
pub use state::AppState;
