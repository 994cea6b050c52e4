//! HTTP/WebSocket surface over the orchestrator.
//!
//! This is the boundary the external CRUD layer talks to: task
//! creation, status documents, a live per-task WebSocket push channel,
//! and a health endpoint. Everything else (auth, billing, tenancy) is
//! the embedding backend's concern.

/// Router construction and handlers.
pub mod server;

pub use server::{build_router, AppState};
