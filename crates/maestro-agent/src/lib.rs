//! Agent runtime: a fixed three-stage execution contract wrapping
//! gateway calls.
//!
//! Every run passes through validate → execute → format. Validation and
//! formatting are pure and never suspend; execute is where gateway
//! traffic (preceded by a budget fit-check and, when needed, a
//! compression pass) happens. Failures inside execute never escape
//! `run` — they come back as a failed [`AgentReport`] with the metrics
//! accumulated so far.

/// Agent configuration.
pub mod config;
/// Metrics and the runtime state machine.
pub mod metrics;
/// The runtime itself.
pub mod runtime;

pub use config::AgentConfig;
pub use metrics::{AgentMetrics, AgentPhase};
pub use runtime::{AgentFailure, AgentInput, AgentOutput, AgentReport, AgentRuntime};
