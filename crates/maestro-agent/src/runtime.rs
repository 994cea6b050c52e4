use crate::config::AgentConfig;
use crate::metrics::{AgentMetrics, AgentPhase};
use maestro_budget::TokenBudget;
use maestro_core::{ChatMessage, MaestroError, MaestroResult};
use maestro_events::{AgentEvent, EventKind, EventPriority, ProgressBus};
use maestro_llm::{LlmGateway, LlmResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Fraction of the context window held back from the fit check.
const SAFETY_MARGIN: f32 = 0.1;
/// Messages at the tail of the context that compression must keep.
const PRESERVE_RECENT: usize = 2;
/// Upper bound on prompt length accepted by validation.
const MAX_PROMPT_CHARS: usize = 200_000;

/// Input to one agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInput {
    /// The instruction for this run.
    pub prompt: String,
    /// Conversation context preceding the prompt (system messages
    /// included).
    #[serde(default)]
    pub context: Vec<ChatMessage>,
}

impl AgentInput {
    /// Input with an empty context.
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: Vec::new(),
        }
    }

    /// Attach preceding context messages.
    pub fn with_context(mut self, context: Vec<ChatMessage>) -> Self {
        self.context = context;
        self
    }
}

/// Caller-facing result shape produced by the format stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Generated text.
    pub content: String,
    /// Model that actually answered (post-fallback).
    pub model: String,
    /// Tokens billed for this run.
    pub tokens_used: u64,
}

/// A failure converted at the `run` boundary: the step that failed plus
/// a human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentFailure {
    /// Name of the stage that failed (`validate_input`, `execute`).
    pub step: String,
    /// Human-readable cause.
    pub message: String,
}

/// What `run` hands back: terminal status, output or failure, and the
/// metrics accumulated up to that point.
#[derive(Debug, Clone)]
pub struct AgentReport {
    /// `Completed` or `Failed`.
    pub status: AgentPhase,
    /// Present when the run completed.
    pub output: Option<AgentOutput>,
    /// Present when the run failed.
    pub error: Option<AgentFailure>,
    /// Metrics snapshot at the end of the run.
    pub metrics: AgentMetrics,
}

/// One LLM-backed unit of work implementing the validate → execute →
/// format contract.
///
/// `run` takes `&mut self`: one logical execution at a time per
/// instance, enforced at compile time. Concurrent executions require
/// separate instances.
pub struct AgentRuntime {
    config: AgentConfig,
    gateway: Arc<LlmGateway>,
    budget: TokenBudget,
    bus: Option<Arc<ProgressBus>>,
    task_id: Option<Uuid>,
    phase: AgentPhase,
    metrics: AgentMetrics,
}

impl AgentRuntime {
    /// Runtime over a shared gateway and the built-in model catalog.
    pub fn new(config: AgentConfig, gateway: Arc<LlmGateway>) -> Self {
        Self {
            config,
            gateway,
            budget: TokenBudget::new(),
            bus: None,
            task_id: None,
            phase: AgentPhase::Idle,
            metrics: AgentMetrics::default(),
        }
    }

    /// Use a custom budget manager (catalog overrides).
    pub fn with_budget(mut self, budget: TokenBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Emit lifecycle events onto the given bus.
    pub fn with_bus(mut self, bus: Arc<ProgressBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Attribute emitted events to a task.
    pub fn with_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// The agent's configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Current state-machine phase.
    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    /// Read-only metrics snapshot.
    pub fn metrics(&self) -> AgentMetrics {
        self.metrics
    }

    /// Suspend a running agent. Only valid from `Running`.
    pub fn pause(&mut self) -> MaestroResult<()> {
        if self.phase != AgentPhase::Running {
            return Err(MaestroError::Task(format!(
                "cannot pause agent '{}' outside Running",
                self.config.name
            )));
        }
        self.phase = AgentPhase::Paused;
        Ok(())
    }

    /// Resume a paused agent. Only valid from `Paused`.
    pub fn resume(&mut self) -> MaestroResult<()> {
        if self.phase != AgentPhase::Paused {
            return Err(MaestroError::Task(format!(
                "cannot resume agent '{}' outside Paused",
                self.config.name
            )));
        }
        self.phase = AgentPhase::Running;
        Ok(())
    }

    fn emit(&self, kind: AgentEvent, data: serde_json::Value, priority: EventPriority) {
        if let Some(bus) = &self.bus {
            bus.emit(
                EventKind::Agent(kind),
                data,
                priority,
                Some(self.config.name.clone()),
                self.task_id,
            );
        }
    }

    /// Run the three-stage contract. Never returns a raw error: every
    /// failure is classified and folded into the report, with metrics
    /// accumulated up to the failure point preserved.
    pub async fn run(&mut self, input: &AgentInput) -> AgentReport {
        self.phase = AgentPhase::Running;
        self.emit(
            AgentEvent::Started,
            serde_json::json!({"model": self.config.model}),
            EventPriority::Normal,
        );
        info!(agent = %self.config.name, "Agent run started");

        if let Err(e) = Self::validate_input(input) {
            return self.fail("validate_input", e);
        }
        self.emit(
            AgentEvent::ValidationComplete,
            serde_json::json!({}),
            EventPriority::Low,
        );

        let started = Instant::now();
        let raw = match self.execute(input).await {
            Ok(raw) => raw,
            Err(e) => return self.fail("execute", e),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.metrics.execution_time_ms += elapsed_ms;
        self.emit(
            AgentEvent::ExecutionComplete,
            serde_json::json!({"elapsed_ms": elapsed_ms}),
            EventPriority::Normal,
        );

        let output = Self::format_output(raw);

        self.phase = AgentPhase::Completed;
        self.emit(
            AgentEvent::Completed,
            serde_json::json!({"tokens_used": output.tokens_used}),
            EventPriority::Normal,
        );
        info!(
            agent = %self.config.name,
            tokens = output.tokens_used,
            elapsed_ms,
            "Agent run completed"
        );

        AgentReport {
            status: AgentPhase::Completed,
            output: Some(output),
            error: None,
            metrics: self.metrics,
        }
    }

    /// Stage 1: side-effect-free input validation.
    fn validate_input(input: &AgentInput) -> MaestroResult<()> {
        if input.prompt.trim().is_empty() {
            return Err(MaestroError::Validation("prompt is empty".into()));
        }
        if input.prompt.len() > MAX_PROMPT_CHARS {
            return Err(MaestroError::Validation(format!(
                "prompt exceeds {MAX_PROMPT_CHARS} characters"
            )));
        }
        Ok(())
    }

    /// Stage 2: the single authoritative unit of work. Fit-check and,
    /// when needed, compress the outbound message set, then call the
    /// gateway.
    async fn execute(&mut self, input: &AgentInput) -> MaestroResult<LlmResponse> {
        let mut messages: Vec<ChatMessage> = input.context.clone();
        messages.push(ChatMessage::user(&input.prompt));

        let fit = self.budget.check_context_fit(
            &messages,
            &self.config.model,
            self.config.max_tokens as usize,
            SAFETY_MARGIN,
        );
        if !fit.fits {
            warn!(
                agent = %self.config.name,
                used = fit.used,
                available = fit.available,
                "Context over budget, compressing"
            );
            messages = self.budget.compress_messages(
                &messages,
                &self.config.model,
                fit.available,
                true,
                PRESERVE_RECENT,
            )?;
        }

        let resp = self.gateway.complete(&messages).await?;

        self.metrics.prompt_tokens += u64::from(resp.prompt_tokens);
        self.metrics.completion_tokens += u64::from(resp.completion_tokens);
        self.metrics.total_tokens += u64::from(resp.tokens_used);
        self.metrics.retry_count += u64::from(resp.retries);

        Ok(resp)
    }

    /// Stage 3: pure transformation into the caller-facing shape.
    fn format_output(raw: LlmResponse) -> AgentOutput {
        AgentOutput {
            content: raw.content,
            model: raw.model,
            tokens_used: u64::from(raw.tokens_used),
        }
    }

    fn fail(&mut self, step: &str, error: MaestroError) -> AgentReport {
        self.phase = AgentPhase::Failed;
        self.metrics.error_count += 1;
        let failure = AgentFailure {
            step: step.to_string(),
            message: error.to_string(),
        };
        warn!(
            agent = %self.config.name,
            step = %failure.step,
            error = %failure.message,
            "Agent run failed"
        );
        self.emit(
            AgentEvent::Failed,
            serde_json::json!({"step": failure.step, "error": failure.message}),
            EventPriority::Critical,
        );
        AgentReport {
            status: AgentPhase::Failed,
            output: None,
            error: Some(failure),
            metrics: self.metrics,
        }
    }
}
