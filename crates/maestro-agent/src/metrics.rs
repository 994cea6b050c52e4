use serde::{Deserialize, Serialize};

/// Execution metrics for one agent.
///
/// Mutated only by the owning runtime during `run`; counts never
/// decrease within one run. Callers get read-only snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Total tokens billed across gateway calls.
    pub total_tokens: u64,
    /// Prompt-side tokens billed.
    pub prompt_tokens: u64,
    /// Completion-side tokens billed.
    pub completion_tokens: u64,
    /// Wall-clock time spent inside the execute stage, in milliseconds.
    pub execution_time_ms: u64,
    /// Gateway retries spent.
    pub retry_count: u64,
    /// Failures recorded.
    pub error_count: u64,
}

/// Runtime state machine: `Idle → Running → {Completed, Failed}`, with
/// `Paused` orthogonal to `Running` (not entered by the default
/// execution path).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentPhase {
    /// Constructed, not yet run.
    Idle,
    /// Inside `run`.
    Running,
    /// Suspended from `Running`; resumable.
    Paused,
    /// `run` finished successfully.
    Completed,
    /// `run` converted a failure into a report.
    Failed,
}
