use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Top-level event category. Callback tables and stream filters operate
/// at [`EventKind`] granularity; stats aggregate at this level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    /// Whole-pipeline lifecycle.
    Workflow,
    /// Agent runtime lifecycle.
    Agent,
    /// Task lifecycle and progress.
    Task,
    /// Gateway request lifecycle.
    Llm,
    /// Free-form log lines routed through the bus.
    Log,
    /// Numeric measurements.
    Metric,
}

/// Workflow-level sub-kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A multi-task pipeline started.
    Started,
    /// One pipeline step finished.
    StepCompleted,
    /// The pipeline finished successfully.
    Completed,
    /// The pipeline failed.
    Failed,
}

/// Agent runtime sub-kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEvent {
    /// `run` entered.
    Started,
    /// Input validation passed.
    ValidationComplete,
    /// The execute stage finished.
    ExecutionComplete,
    /// `run` returned successfully.
    Completed,
    /// `run` converted a failure into a report.
    Failed,
}

/// Task lifecycle sub-kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEvent {
    /// Task record created (status pending).
    Created,
    /// Execution started (status running).
    Started,
    /// Progress or current-step update.
    Progress,
    /// Terminal: completed.
    Completed,
    /// Terminal: failed.
    Failed,
    /// Terminal: cancelled.
    Cancelled,
}

/// Gateway request sub-kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmEvent {
    /// An outbound completion request started.
    RequestStarted,
    /// The request returned successfully.
    RequestCompleted,
    /// A retry was scheduled after a transient failure.
    RetryScheduled,
    /// The retry budget on one model was exhausted and the next
    /// fallback model was engaged.
    FallbackEngaged,
}

/// Log severity sub-kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    /// Debug-level detail.
    Debug,
    /// Informational.
    Info,
    /// Something unexpected but recoverable.
    Warning,
    /// A failure worth surfacing.
    Error,
}

/// Metric sub-kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricEvent {
    /// Monotonic count.
    Counter,
    /// Point-in-time value.
    Gauge,
    /// Duration measurement.
    Timing,
}

/// Fully qualified event kind: category plus sub-kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "category", content = "kind", rename_all = "lowercase")]
pub enum EventKind {
    /// See [`WorkflowEvent`].
    Workflow(WorkflowEvent),
    /// See [`AgentEvent`].
    Agent(AgentEvent),
    /// See [`TaskEvent`].
    Task(TaskEvent),
    /// See [`LlmEvent`].
    Llm(LlmEvent),
    /// See [`LogEvent`].
    Log(LogEvent),
    /// See [`MetricEvent`].
    Metric(MetricEvent),
}

impl EventKind {
    /// The top-level category of this kind.
    pub fn category(&self) -> EventCategory {
        match self {
            EventKind::Workflow(_) => EventCategory::Workflow,
            EventKind::Agent(_) => EventCategory::Agent,
            EventKind::Task(_) => EventCategory::Task,
            EventKind::Llm(_) => EventCategory::Llm,
            EventKind::Log(_) => EventCategory::Log,
            EventKind::Metric(_) => EventCategory::Metric,
        }
    }
}

/// Delivery priority attached to an event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    /// Diagnostic chatter.
    Low,
    /// Regular lifecycle traffic.
    #[default]
    Normal,
    /// State transitions observers should not miss.
    High,
    /// Failures and terminal transitions.
    Critical,
}

/// One event as it flows through the bus. Immutable once emitted; the
/// ring buffer owns its copy until eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Monotonically increasing emission number, bus-wide.
    pub sequence: u64,
    /// Fully qualified kind.
    pub kind: EventKind,
    /// Arbitrary JSON payload.
    pub data: serde_json::Value,
    /// Delivery priority.
    pub priority: EventPriority,
    /// Originating agent, when applicable.
    pub agent_id: Option<String>,
    /// Originating task, when applicable.
    pub task_id: Option<Uuid>,
    /// UTC emission time.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_to_category() {
        assert_eq!(
            EventKind::Task(TaskEvent::Progress).category(),
            EventCategory::Task
        );
        assert_eq!(
            EventKind::Llm(LlmEvent::RetryScheduled).category(),
            EventCategory::Llm
        );
    }

    #[test]
    fn kind_serialization_is_tagged() {
        let kind = EventKind::Task(TaskEvent::Progress);
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains("\"task\""));
        assert!(json.contains("\"progress\""));
        let back: EventKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn priority_ordering() {
        assert!(EventPriority::Critical > EventPriority::High);
        assert!(EventPriority::High > EventPriority::Normal);
        assert!(EventPriority::Normal > EventPriority::Low);
    }
}
