//! Task orchestration: asynchronous job tracking over agent runtimes.
//!
//! The orchestrator creates tasks, runs one or more agent iterations
//! per task, aggregates progress, fans every transition out through the
//! progress bus to live subscribers, and optionally gates completion
//! behind a secondary quality evaluation.
//!
//! Tasks live in an injected key-value store; the orchestrator itself
//! holds no persistent state. Only the future executing a task mutates
//! its record — every other reader gets point-in-time snapshots.
//!
//! # Main types
//!
//! - [`Orchestrator`] — create / execute / status / cancel / health.
//! - [`TaskSpec`] / [`TaskRecord`] / [`TaskStatus`] — the task model.
//! - [`TaskStore`] — injected persistence abstraction.
//! - [`QualityGate`] — post-execution evaluation hook.

/// The orchestration engine.
pub mod engine;
/// Quality gate evaluation.
pub mod quality;
/// Task store abstraction and the in-memory implementation.
pub mod store;
/// Task model types.
pub mod task;

pub use engine::{GatewayFactory, Orchestrator};
pub use quality::{LlmQualityGate, QualityCheck, QualityGate, QualityReport};
pub use store::{MemoryTaskStore, TaskStore};
pub use task::{HealthSnapshot, TaskPriority, TaskReceipt, TaskRecord, TaskSpec, TaskStatus};
