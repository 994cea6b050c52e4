use crate::quality::{LlmQualityGate, QualityGate};
use crate::store::TaskStore;
use crate::task::{HealthSnapshot, TaskReceipt, TaskRecord, TaskSpec, TaskStatus};
use chrono::Utc;
use maestro_agent::{AgentConfig, AgentInput, AgentPhase, AgentRuntime};
use maestro_core::{MaestroError, MaestroResult};
use maestro_events::{EventKind, EventPriority, EventStream, ProgressBus, StreamFilter, TaskEvent};
use maestro_llm::{GatewayConfig, LlmGateway};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

/// Builds a gateway for one task from its spec-derived config. The
/// default factory wires the shipped HTTP backend; tests swap in
/// scripted backends.
pub type GatewayFactory = dyn Fn(GatewayConfig) -> LlmGateway + Send + Sync;

/// Rough per-iteration duration estimate used in task receipts.
const ESTIMATED_SECS_PER_ITERATION: u64 = 30;

/// The task orchestrator.
///
/// Holds the injected store and bus explicitly — there are no process
/// globals. One orchestrator coordinates any number of concurrently
/// executing tasks inside a single process.
pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
    bus: Arc<ProgressBus>,
    gateway_factory: Box<GatewayFactory>,
    quality: Arc<dyn QualityGate>,
    cancel_flags: Mutex<HashMap<Uuid, Arc<AtomicBool>>>,
    active: AtomicUsize,
}

impl Orchestrator {
    /// Orchestrator over a store and bus, with the HTTP gateway and the
    /// LLM-backed quality gate.
    pub fn new(store: Arc<dyn TaskStore>, bus: Arc<ProgressBus>) -> Self {
        Self {
            store,
            bus,
            gateway_factory: Box::new(LlmGateway::new),
            quality: Arc::new(LlmQualityGate),
            cancel_flags: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
        }
    }

    /// Replace the gateway factory (stub backends in tests, custom
    /// catalogs in embeddings).
    pub fn with_gateway_factory(mut self, factory: Box<GatewayFactory>) -> Self {
        self.gateway_factory = factory;
        self
    }

    /// Replace the quality gate implementation.
    pub fn with_quality_gate(mut self, gate: Arc<dyn QualityGate>) -> Self {
        self.quality = gate;
        self
    }

    /// The progress bus tasks broadcast on.
    pub fn bus(&self) -> &Arc<ProgressBus> {
        &self.bus
    }

    /// Allocate and persist a new pending task.
    pub async fn create_task(&self, spec: TaskSpec) -> MaestroResult<TaskReceipt> {
        if spec.description.trim().is_empty() {
            return Err(MaestroError::Validation("task description is empty".into()));
        }
        if spec.model.trim().is_empty() {
            return Err(MaestroError::Validation("task model is empty".into()));
        }
        if spec.max_iterations == 0 {
            return Err(MaestroError::Validation(
                "max_iterations must be at least 1".into(),
            ));
        }

        let estimated = u64::from(spec.max_iterations + u32::from(spec.quality_gate))
            * ESTIMATED_SECS_PER_ITERATION;
        let record = TaskRecord::new(spec);
        self.store.put(&record).await?;
        self.cancel_flags
            .lock()
            .insert(record.task_id, Arc::new(AtomicBool::new(false)));

        info!(task_id = %record.task_id, "Task created");
        self.bus.emit(
            EventKind::Task(TaskEvent::Created),
            serde_json::json!({"status": "pending", "description": record.spec.description}),
            EventPriority::Normal,
            None,
            Some(record.task_id),
        );

        Ok(TaskReceipt {
            task_id: record.task_id,
            status: record.status,
            created_at: record.created_at,
            estimated_duration_secs: estimated,
        })
    }

    /// Execute a pending task to a terminal status.
    ///
    /// Failures inside the pipeline are caught here and recorded on the
    /// task instead of propagating: the returned error is reserved for
    /// contract violations (unknown id, task not pending).
    pub async fn execute_task(&self, task_id: Uuid) -> MaestroResult<TaskStatus> {
        let mut record = self
            .store
            .get(task_id)
            .await?
            .ok_or_else(|| MaestroError::NotFound(format!("task {task_id}")))?;

        if record.status != TaskStatus::Pending {
            return Err(MaestroError::Task(format!(
                "task {task_id} is {:?}, not pending",
                record.status
            )));
        }

        let cancel = self.cancel_flag(task_id);
        self.active.fetch_add(1, Ordering::SeqCst);
        let outcome = self.run_pipeline(&mut record, &cancel).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(status) => Ok(status),
            Err(e) => {
                // Uncaught pipeline failure: convert at this boundary,
                // preserving partial progress.
                error!(task_id = %task_id, error = %e, "Task pipeline error");
                let message = format!("{}: {e}", record.current_step);
                record.finish(TaskStatus::Failed, Some(message));
                self.persist_and_broadcast(&record, TaskEvent::Failed).await;
                Ok(TaskStatus::Failed)
            }
        }
    }

    /// Execute in the background; the handle resolves to the terminal
    /// status.
    pub fn spawn_task(self: &Arc<Self>, task_id: Uuid) -> JoinHandle<MaestroResult<TaskStatus>> {
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.execute_task(task_id).await })
    }

    async fn run_pipeline(
        &self,
        record: &mut TaskRecord,
        cancel: &AtomicBool,
    ) -> MaestroResult<TaskStatus> {
        let task_id = record.task_id;
        record.status = TaskStatus::Running;
        record.advance(0, "starting");
        self.persist_and_broadcast(record, TaskEvent::Started).await;

        let spec = record.spec.clone();
        let gateway_config = GatewayConfig::new(&spec.model, &spec.credential);
        let gateway =
            Arc::new((self.gateway_factory)(gateway_config).with_bus(self.bus.clone()));

        let total_steps = spec.max_iterations + u32::from(spec.quality_gate);
        let mut artifacts: Vec<String> = Vec::new();

        for iteration in 1..=spec.max_iterations {
            if cancel.load(Ordering::SeqCst) {
                info!(task_id = %task_id, iteration, "Cancellation observed at step boundary");
                record.finish(TaskStatus::Cancelled, None);
                self.persist_and_broadcast(record, TaskEvent::Cancelled).await;
                return Ok(TaskStatus::Cancelled);
            }

            let step = format!("iteration {iteration}/{}", spec.max_iterations);
            record.advance(record.progress, step.as_str());

            let agent_config = AgentConfig::new(
                format!("{}-iter{iteration}", spec.model),
                &spec.model,
                &spec.credential,
            );
            let mut agent = AgentRuntime::new(agent_config, gateway.clone())
                .with_bus(self.bus.clone())
                .with_task(task_id);

            let input = match artifacts.last() {
                None => AgentInput::prompt(&spec.description).with_context(spec.context.clone()),
                Some(previous) => AgentInput::prompt(format!(
                    "Refine the previous answer so it better satisfies the goal.\n\
                     Goal: {}\n\nPrevious answer:\n{previous}",
                    spec.description
                )),
            };

            let report = agent.run(&input).await;
            record.absorb_metrics(&report.metrics);

            match report.status {
                AgentPhase::Completed => {
                    let output = report.output.ok_or_else(|| {
                        MaestroError::Task("completed agent returned no output".into())
                    })?;
                    artifacts.push(output.content);
                }
                _ => {
                    let failure = report.error.map_or_else(
                        || "unknown agent failure".to_string(),
                        |f| format!("{}: {}", f.step, f.message),
                    );
                    record.result = Self::result_json(&artifacts);
                    record.finish(TaskStatus::Failed, Some(failure));
                    self.persist_and_broadcast(record, TaskEvent::Failed).await;
                    return Ok(TaskStatus::Failed);
                }
            }

            let progress = (iteration * 100 / total_steps.max(1)) as u8;
            record.advance(progress, step.as_str());
            self.persist_and_broadcast(record, TaskEvent::Progress).await;
        }

        record.result = Self::result_json(&artifacts);

        if spec.quality_gate {
            if cancel.load(Ordering::SeqCst) {
                record.finish(TaskStatus::Cancelled, None);
                self.persist_and_broadcast(record, TaskEvent::Cancelled).await;
                return Ok(TaskStatus::Cancelled);
            }

            record.advance(record.progress, "quality_gate");
            self.persist_and_broadcast(record, TaskEvent::Progress).await;

            let artifact = artifacts.last().map(String::as_str).unwrap_or_default();
            let verdict = self
                .quality
                .evaluate(&gateway, &spec.description, artifact)
                .await;

            match verdict {
                Ok(report) if report.passed => {
                    info!(task_id = %task_id, score = report.score, "Quality gate passed");
                }
                Ok(report) => {
                    let failing: Vec<&str> = report
                        .checks
                        .iter()
                        .filter(|c| !c.passed)
                        .map(|c| c.name.as_str())
                        .collect();
                    let message = format!(
                        "quality gate failed (score {:.2}; failing checks: {})",
                        report.score,
                        failing.join(", ")
                    );
                    record.finish(TaskStatus::Failed, Some(message));
                    self.persist_and_broadcast(record, TaskEvent::Failed).await;
                    return Ok(TaskStatus::Failed);
                }
                Err(e) => {
                    record.finish(
                        TaskStatus::Failed,
                        Some(format!("quality gate evaluation error: {e}")),
                    );
                    self.persist_and_broadcast(record, TaskEvent::Failed).await;
                    return Ok(TaskStatus::Failed);
                }
            }
        }

        record.finish(TaskStatus::Completed, None);
        self.persist_and_broadcast(record, TaskEvent::Completed).await;
        info!(task_id = %task_id, "Task completed");
        Ok(TaskStatus::Completed)
    }

    fn result_json(artifacts: &[String]) -> Option<serde_json::Value> {
        if artifacts.is_empty() {
            None
        } else {
            Some(serde_json::json!({
                "artifacts": artifacts,
                "iterations": artifacts.len(),
                "final": artifacts.last(),
            }))
        }
    }

    async fn persist_and_broadcast(&self, record: &TaskRecord, kind: TaskEvent) {
        if let Err(e) = self.store.put(record).await {
            error!(task_id = %record.task_id, error = %e, "Failed to persist task snapshot");
        }

        let priority = match kind {
            TaskEvent::Failed | TaskEvent::Cancelled => EventPriority::Critical,
            TaskEvent::Completed => EventPriority::High,
            _ => EventPriority::Normal,
        };
        self.bus.emit(
            EventKind::Task(kind),
            serde_json::json!({
                "status": record.status,
                "progress": record.progress,
                "current_step": record.current_step,
                "error": record.error,
            }),
            priority,
            None,
            Some(record.task_id),
        );
    }

    fn cancel_flag(&self, task_id: Uuid) -> Arc<AtomicBool> {
        self.cancel_flags
            .lock()
            .entry(task_id)
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    /// Point-in-time snapshot of a task.
    pub async fn get_status(&self, task_id: Uuid) -> MaestroResult<TaskRecord> {
        self.store
            .get(task_id)
            .await?
            .ok_or_else(|| MaestroError::NotFound(format!("task {task_id}")))
    }

    /// Request cooperative cancellation. A pending task cancels
    /// immediately; a running one cancels at its next step boundary
    /// (in-flight gateway calls are not aborted); a terminal one is
    /// left frozen. Returns the status as of this call.
    pub async fn cancel(&self, task_id: Uuid) -> MaestroResult<TaskStatus> {
        let mut record = self
            .store
            .get(task_id)
            .await?
            .ok_or_else(|| MaestroError::NotFound(format!("task {task_id}")))?;

        if record.status.is_terminal() {
            return Ok(record.status);
        }

        self.cancel_flag(task_id).store(true, Ordering::SeqCst);

        if record.status == TaskStatus::Pending {
            record.finish(TaskStatus::Cancelled, None);
            self.persist_and_broadcast(&record, TaskEvent::Cancelled).await;
            return Ok(TaskStatus::Cancelled);
        }

        info!(task_id = %task_id, "Cancellation requested");
        Ok(record.status)
    }

    /// Attach a live subscriber to one task's transitions. Any number
    /// of subscribers may watch the same task; detaching one (via
    /// [`Self::unsubscribe`]) never affects the task or its other
    /// subscribers.
    pub fn subscribe(&self, task_id: Uuid) -> EventStream {
        self.bus.subscribe(StreamFilter::for_task(task_id))
    }

    /// Detach a subscriber stream.
    pub fn unsubscribe(&self, stream_id: Uuid) {
        self.bus.unsubscribe(stream_id);
    }

    /// Health document for the external surface.
    pub async fn health(&self) -> MaestroResult<HealthSnapshot> {
        Ok(HealthSnapshot {
            status: "ok".to_string(),
            active_tasks: self.active.load(Ordering::SeqCst),
            total_tasks: self.store.list().await?.len(),
            live_subscriber_count: self.bus.subscriber_count(),
            timestamp: Utc::now(),
        })
    }
}
