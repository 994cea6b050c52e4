use chrono::{DateTime, Utc};
use maestro_agent::AgentMetrics;
use maestro_core::ChatMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scheduling priority of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Background work.
    Low,
    /// Default.
    #[default]
    Normal,
    /// Run ahead of normal traffic.
    High,
}

/// Task lifecycle status. The three terminal states never transition
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet executing.
    Pending,
    /// Executing.
    Running,
    /// Terminal: finished successfully.
    Completed,
    /// Terminal: finished with a recorded error.
    Failed,
    /// Terminal: cancelled cooperatively.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status freezes the record.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// What a caller submits to create a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// What the task should accomplish.
    pub description: String,
    /// Conversation context handed to the first agent iteration.
    #[serde(default)]
    pub context: Vec<ChatMessage>,
    /// Model for the agent runs.
    pub model: String,
    /// Bearer credential for the remote API.
    pub credential: String,
    /// Scheduling priority.
    #[serde(default)]
    pub priority: TaskPriority,
    /// Number of agent iterations (each refines the previous result).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Defer completion behind a secondary quality evaluation.
    #[serde(default)]
    pub quality_gate: bool,
}

fn default_max_iterations() -> u32 {
    1
}

impl TaskSpec {
    /// Spec with defaults for everything but the required fields.
    pub fn new(
        description: impl Into<String>,
        model: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            context: Vec::new(),
            model: model.into(),
            credential: credential.into(),
            priority: TaskPriority::default(),
            max_iterations: default_max_iterations(),
            quality_gate: false,
        }
    }
}

/// The tracked state of one task.
///
/// Mutated exclusively by the execution future that owns it; everyone
/// else sees cloned snapshots. Once `status` is terminal the record is
/// frozen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Opaque unique identifier.
    pub task_id: Uuid,
    /// The submitted spec.
    pub spec: TaskSpec,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// 0–100, non-decreasing until a terminal status.
    pub progress: u8,
    /// Human-readable name of the current step.
    pub current_step: String,
    /// Generated artifacts; retained even when a quality gate fails
    /// the task.
    pub result: Option<serde_json::Value>,
    /// Recorded failure, including the step that failed.
    pub error: Option<String>,
    /// Aggregated metrics across agent iterations.
    #[serde(default)]
    pub metrics: AgentMetrics,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Set when a terminal status is reached.
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Fresh pending record for a spec.
    pub fn new(spec: TaskSpec) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4(),
            spec,
            status: TaskStatus::Pending,
            progress: 0,
            current_step: "pending".to_string(),
            result: None,
            error: None,
            metrics: AgentMetrics::default(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Record a progress update. Progress is clamped so it never
    /// decreases while the task is live.
    pub fn advance(&mut self, progress: u8, step: impl Into<String>) {
        self.progress = self.progress.max(progress.min(100));
        self.current_step = step.into();
        self.updated_at = Utc::now();
    }

    /// Move into a terminal status and freeze the record.
    pub fn finish(&mut self, status: TaskStatus, error: Option<String>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.error = error;
        if status == TaskStatus::Completed {
            self.progress = 100;
        }
        let now = Utc::now();
        self.updated_at = now;
        self.completed_at = Some(now);
    }

    /// Fold one agent run's metrics into the task aggregate.
    pub fn absorb_metrics(&mut self, metrics: &AgentMetrics) {
        self.metrics.total_tokens += metrics.total_tokens;
        self.metrics.prompt_tokens += metrics.prompt_tokens;
        self.metrics.completion_tokens += metrics.completion_tokens;
        self.metrics.execution_time_ms += metrics.execution_time_ms;
        self.metrics.retry_count += metrics.retry_count;
        self.metrics.error_count += metrics.error_count;
    }
}

/// Returned by task creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReceipt {
    /// The new task's identifier.
    pub task_id: Uuid,
    /// Always `pending` at creation.
    pub status: TaskStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Rough duration estimate in seconds, for client timeouts.
    pub estimated_duration_secs: u64,
}

/// Orchestrator health document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// `"ok"` while the orchestrator is serving.
    pub status: String,
    /// Tasks currently inside `execute_task`.
    pub active_tasks: usize,
    /// Tasks known to the store.
    pub total_tasks: usize,
    /// Live subscriber streams on the bus.
    pub live_subscriber_count: usize,
    /// Snapshot time.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn record() -> TaskRecord {
        TaskRecord::new(TaskSpec::new("summarize the report", "gpt-4o", "key"))
    }

    #[test]
    fn new_record_is_pending_at_zero() {
        let record = record();
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.progress, 0);
        assert!(record.result.is_none());
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn advance_never_decreases_progress() {
        let mut record = record();
        record.advance(40, "step 1");
        record.advance(20, "step 2");
        assert_eq!(record.progress, 40);
        assert_eq!(record.current_step, "step 2");
        record.advance(90, "step 3");
        assert_eq!(record.progress, 90);
    }

    #[test]
    fn advance_clamps_to_100() {
        let mut record = record();
        record.advance(250, "overeager");
        assert_eq!(record.progress, 100);
    }

    #[test]
    fn finish_completed_sets_progress_and_timestamp() {
        let mut record = record();
        record.advance(60, "almost");
        record.finish(TaskStatus::Completed, None);
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.progress, 100);
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn finish_failed_keeps_partial_progress() {
        let mut record = record();
        record.advance(60, "almost");
        record.finish(TaskStatus::Failed, Some("execute: boom".into()));
        assert_eq!(record.progress, 60);
        assert_eq!(record.error.as_deref(), Some("execute: boom"));
    }

    #[test]
    fn terminal_statuses_are_terminal() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn metrics_absorption_accumulates() {
        let mut record = record();
        let mut m = AgentMetrics::default();
        m.total_tokens = 30;
        m.retry_count = 2;
        record.absorb_metrics(&m);
        record.absorb_metrics(&m);
        assert_eq!(record.metrics.total_tokens, 60);
        assert_eq!(record.metrics.retry_count, 4);
    }

    #[test]
    fn spec_deserializes_with_defaults() {
        let spec: TaskSpec = serde_json::from_str(
            r#"{"description": "d", "model": "m", "credential": "c"}"#,
        )
        .unwrap();
        assert_eq!(spec.max_iterations, 1);
        assert!(!spec.quality_gate);
        assert_eq!(spec.priority, TaskPriority::Normal);
    }
}
