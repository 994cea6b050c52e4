//! Core types and error definitions for the Maestro task engine.
//!
//! This crate provides the foundational types shared across all Maestro
//! crates: the unified error enum, retryability classification, and the
//! chat message representation that flows between the budget manager, the
//! LLM gateway, the agent runtime, and the orchestrator.
//!
//! # Main types
//!
//! - [`MaestroError`] — Unified error enum for all Maestro subsystems.
//! - [`MaestroResult`] — Convenience alias for `Result<T, MaestroError>`.
//! - [`Role`] — Message role (user, assistant, system, tool).
//! - [`ChatMessage`] — A single message in an outbound LLM conversation.

/// Error taxonomy and retryability classification.
pub mod error;
/// Chat message and role types.
pub mod message;

pub use error::{is_retryable, MaestroError, MaestroResult};
pub use message::{ChatMessage, Role};
