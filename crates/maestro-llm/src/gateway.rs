use crate::backend::{ChatRequest, CompletionBackend, CompletionResponse, HttpBackend, StreamChunk};
use crate::config::GatewayConfig;
use maestro_budget::ModelCatalog;
use maestro_core::{is_retryable, ChatMessage, MaestroError, MaestroResult};
use maestro_events::{EventKind, EventPriority, LlmEvent, ProgressBus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Token-accounted result of one gateway call.
///
/// `model` is the model that actually answered, which differs from the
/// requested one after fallback. Immutable once created.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Generated text.
    pub content: String,
    /// Model that produced the response.
    pub model: String,
    /// Prompt tokens billed.
    pub prompt_tokens: u32,
    /// Completion tokens billed.
    pub completion_tokens: u32,
    /// Total tokens billed.
    pub tokens_used: u32,
    /// Retries spent across the whole call (all models).
    pub retries: u32,
}

/// Resilient LLM client: retry with backoff, ordered model fallback,
/// and minimum inter-request pacing.
///
/// One gateway instance serializes its request dispatches through the
/// pacer, so the minimum interval holds across concurrent callers and
/// retry state alike.
pub struct LlmGateway {
    config: GatewayConfig,
    backend: Box<dyn CompletionBackend>,
    catalog: ModelCatalog,
    last_dispatch: tokio::sync::Mutex<Option<Instant>>,
    bus: Option<Arc<ProgressBus>>,
}

impl LlmGateway {
    /// Gateway over the shipped HTTP backend.
    pub fn new(config: GatewayConfig) -> Self {
        let backend = Box::new(HttpBackend::new(&config));
        Self::with_backend(config, backend)
    }

    /// Gateway over a custom backend (stubs, in-process mocks).
    pub fn with_backend(config: GatewayConfig, backend: Box<dyn CompletionBackend>) -> Self {
        Self {
            config,
            backend,
            catalog: ModelCatalog::builtin(),
            last_dispatch: tokio::sync::Mutex::new(None),
            bus: None,
        }
    }

    /// Validate models against a custom catalog instead of the built-in
    /// one.
    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Emit request lifecycle events onto the given bus.
    pub fn with_bus(mut self, bus: Arc<ProgressBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// The gateway's configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn emit(&self, kind: LlmEvent, data: serde_json::Value) {
        if let Some(bus) = &self.bus {
            bus.emit(EventKind::Llm(kind), data, EventPriority::Normal, None, None);
        }
    }

    fn validate(&self, messages: &[ChatMessage]) -> MaestroResult<()> {
        if messages.is_empty() {
            return Err(MaestroError::Validation("message set is empty".into()));
        }
        for model in self.config.model_chain() {
            if !self.catalog.contains(&model) {
                return Err(MaestroError::Validation(format!("unknown model: {model}")));
            }
        }
        Ok(())
    }

    /// Enforce the minimum inter-request delay. Holding the lock across
    /// the sleep serializes dispatches from concurrent callers.
    async fn pace(&self) {
        let mut last = self.last_dispatch.lock().await;
        if let Some(prev) = *last {
            let min = Duration::from_millis(self.config.min_request_interval_ms);
            let elapsed = prev.elapsed();
            if elapsed < min {
                tokio::time::sleep(min - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn request_for(&self, model: &str, messages: &[ChatMessage]) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }

    /// Non-streaming completion with the full resilience policy.
    ///
    /// Per model: at most `max_retries + 1` attempts, backoff between
    /// them, only transient errors retried. Exhausting one model's
    /// budget advances to the next fallback model with a fresh attempt
    /// counter; exhausting the whole chain raises a model error.
    /// Validation failures surface immediately and are never retried.
    pub async fn complete(&self, messages: &[ChatMessage]) -> MaestroResult<LlmResponse> {
        self.validate(messages)?;

        let chain = self.config.model_chain();
        let mut total_retries = 0u32;
        let mut last_err: Option<MaestroError> = None;

        for (model_idx, model) in chain.iter().enumerate() {
            if model_idx > 0 {
                warn!(model = %model, "Falling back to next model");
                self.emit(
                    LlmEvent::FallbackEngaged,
                    serde_json::json!({"model": model}),
                );
            }
            let request = self.request_for(model, messages);

            for attempt in 0..=self.config.retry.max_retries {
                self.pace().await;
                self.emit(
                    LlmEvent::RequestStarted,
                    serde_json::json!({"model": model, "attempt": attempt}),
                );

                match self.backend.complete(&request).await {
                    Ok(resp) => {
                        info!(model = %model, attempt, "Completion succeeded");
                        self.emit(
                            LlmEvent::RequestCompleted,
                            serde_json::json!({
                                "model": model,
                                "tokens": resp.prompt_tokens + resp.completion_tokens,
                            }),
                        );
                        return Ok(self.account(model, resp, total_retries));
                    }
                    Err(e) if matches!(e, MaestroError::Validation(_)) => return Err(e),
                    Err(e) => {
                        if !is_retryable(&e) || attempt == self.config.retry.max_retries {
                            warn!(model = %model, attempt, error = %e, "Model attempt budget spent");
                            last_err = Some(e);
                            break; // advance to next model
                        }
                        let delay = self.config.retry.delay(attempt);
                        info!(
                            model = %model,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Transient error, backing off"
                        );
                        self.emit(
                            LlmEvent::RetryScheduled,
                            serde_json::json!({
                                "model": model,
                                "attempt": attempt,
                                "delay_ms": delay.as_millis() as u64,
                            }),
                        );
                        tokio::time::sleep(delay).await;
                        total_retries += 1;
                        last_err = Some(e);
                    }
                }
            }
        }

        let detail = last_err.map(|e| e.to_string()).unwrap_or_default();
        Err(MaestroError::Model(format!(
            "all models exhausted ({}): {detail}",
            chain.join(" -> ")
        )))
    }

    /// Streaming completion. The same validation, pacing, retry, and
    /// fallback policy applies to establishing the stream; once chunks
    /// are flowing the stream is finite and not restartable.
    pub async fn stream(
        &self,
        messages: &[ChatMessage],
    ) -> MaestroResult<(
        mpsc::Receiver<StreamChunk>,
        JoinHandle<MaestroResult<CompletionResponse>>,
    )> {
        self.validate(messages)?;

        let chain = self.config.model_chain();
        let mut last_err: Option<MaestroError> = None;

        for (model_idx, model) in chain.iter().enumerate() {
            if model_idx > 0 {
                self.emit(
                    LlmEvent::FallbackEngaged,
                    serde_json::json!({"model": model}),
                );
            }
            let request = self.request_for(model, messages);

            for attempt in 0..=self.config.retry.max_retries {
                self.pace().await;
                self.emit(
                    LlmEvent::RequestStarted,
                    serde_json::json!({"model": model, "attempt": attempt, "stream": true}),
                );

                match self.backend.stream(&request).await {
                    Ok(result) => return Ok(result),
                    Err(e) if matches!(e, MaestroError::Validation(_)) => return Err(e),
                    Err(e) => {
                        if !is_retryable(&e) || attempt == self.config.retry.max_retries {
                            last_err = Some(e);
                            break;
                        }
                        let delay = self.config.retry.delay(attempt);
                        warn!(model = %model, attempt, error = %e, "Transient stream error, backing off");
                        tokio::time::sleep(delay).await;
                        last_err = Some(e);
                    }
                }
            }
        }

        let detail = last_err.map(|e| e.to_string()).unwrap_or_default();
        Err(MaestroError::Model(format!(
            "all models exhausted ({}): {detail}",
            chain.join(" -> ")
        )))
    }

    fn account(&self, model: &str, resp: CompletionResponse, retries: u32) -> LlmResponse {
        LlmResponse {
            content: resp.content,
            model: model.to_string(),
            prompt_tokens: resp.prompt_tokens,
            completion_tokens: resp.completion_tokens,
            tokens_used: resp.prompt_tokens + resp.completion_tokens,
            retries,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use maestro_budget::{ModelCatalog, ModelSpec};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A scripted backend: pops pre-seeded results in order and counts
    /// calls per model through shared handles.
    struct ScriptedBackend {
        results: tokio::sync::Mutex<Vec<MaestroResult<CompletionResponse>>>,
        calls: Arc<AtomicU32>,
        calls_by_model: Arc<std::sync::Mutex<std::collections::HashMap<String, u32>>>,
    }

    impl ScriptedBackend {
        fn new(results: Vec<MaestroResult<CompletionResponse>>) -> Self {
            Self {
                results: tokio::sync::Mutex::new(results),
                calls: Arc::new(AtomicU32::new(0)),
                calls_by_model: Arc::default(),
            }
        }

        fn ok(content: &str) -> MaestroResult<CompletionResponse> {
            Ok(CompletionResponse {
                content: content.to_string(),
                prompt_tokens: 10,
                completion_tokens: 5,
            })
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, request: &ChatRequest) -> MaestroResult<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self
                .calls_by_model
                .lock()
                .unwrap()
                .entry(request.model.clone())
                .or_insert(0) += 1;
            let mut results = self.results.lock().await;
            if results.is_empty() {
                Err(MaestroError::Network("script exhausted".into()))
            } else {
                results.remove(0)
            }
        }

        async fn stream(
            &self,
            request: &ChatRequest,
        ) -> MaestroResult<(
            mpsc::Receiver<StreamChunk>,
            JoinHandle<MaestroResult<CompletionResponse>>,
        )> {
            let resp = self.complete(request).await?;
            let (tx, rx) = mpsc::channel(4);
            let content = resp.content.clone();
            let handle = tokio::spawn(async move {
                let _ = tx.send(StreamChunk::Text { text: content }).await;
                let _ = tx.send(StreamChunk::Done).await;
                Ok(resp)
            });
            Ok((rx, handle))
        }
    }

    fn test_catalog() -> ModelCatalog {
        let mut catalog = ModelCatalog::with_default(ModelSpec {
            context_window: 8_192,
            chars_per_token: 4.0,
        });
        for name in ["primary", "backup", "last-resort"] {
            catalog.insert(
                name,
                ModelSpec {
                    context_window: 8_192,
                    chars_per_token: 4.0,
                },
            );
        }
        catalog
    }

    fn instant_config(max_retries: u32, fallbacks: &[&str]) -> GatewayConfig {
        let mut config = GatewayConfig::new("primary", "test-key");
        config.retry = crate::RetryPolicy::instant(max_retries);
        config.min_request_interval_ms = 0;
        config.fallback_models = fallbacks.iter().map(|s| (*s).to_string()).collect();
        config
    }

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage::user("hello")]
    }

    #[tokio::test]
    async fn empty_messages_fail_validation_without_any_call() {
        let backend = ScriptedBackend::new(vec![ScriptedBackend::ok("unused")]);
        let gateway = LlmGateway::with_backend(instant_config(3, &[]), Box::new(backend))
            .with_catalog(test_catalog());
        let err = gateway.complete(&[]).await.unwrap_err();
        assert!(matches!(err, MaestroError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_model_fails_validation() {
        let mut config = instant_config(0, &[]);
        config.model = "never-heard-of-it".into();
        let backend = ScriptedBackend::new(vec![]);
        let gateway =
            LlmGateway::with_backend(config, Box::new(backend)).with_catalog(test_catalog());
        let err = gateway.complete(&messages()).await.unwrap_err();
        assert!(matches!(err, MaestroError::Validation(_)));
    }

    #[tokio::test]
    async fn rate_limit_retried_then_succeeds() {
        let backend = ScriptedBackend::new(vec![
            Err(MaestroError::RateLimited("429".into())),
            Err(MaestroError::RateLimited("429".into())),
            ScriptedBackend::ok("finally"),
        ]);
        let gateway = LlmGateway::with_backend(instant_config(3, &[]), Box::new(backend))
            .with_catalog(test_catalog());

        let resp = gateway.complete(&messages()).await.unwrap();
        assert_eq!(resp.content, "finally");
        assert_eq!(resp.retries, 2);
        assert_eq!(resp.model, "primary");
        assert_eq!(resp.tokens_used, 15);
    }

    #[tokio::test]
    async fn retry_bound_is_max_retries_plus_one_per_model() {
        let backend = ScriptedBackend::new(vec![
            Err(MaestroError::Network("down".into())),
            Err(MaestroError::Network("down".into())),
            Err(MaestroError::Network("down".into())),
            Err(MaestroError::Network("down".into())),
        ]);
        let calls = backend.calls.clone();
        let gateway = LlmGateway::with_backend(instant_config(2, &[]), Box::new(backend))
            .with_catalog(test_catalog());

        let err = gateway.complete(&messages()).await.unwrap_err();
        assert!(matches!(err, MaestroError::Model(_)));
        // max_retries = 2 -> exactly 3 attempts on the only model.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fallback_resets_attempt_counter_and_reports_model() {
        // Primary burns 3 attempts (max_retries = 2), then backup
        // answers on its second attempt.
        let backend = ScriptedBackend::new(vec![
            Err(MaestroError::Network("down".into())),
            Err(MaestroError::Network("down".into())),
            Err(MaestroError::Network("down".into())),
            Err(MaestroError::RateLimited("429".into())),
            ScriptedBackend::ok("from backup"),
        ]);
        let by_model = backend.calls_by_model.clone();
        let gateway = LlmGateway::with_backend(instant_config(2, &["backup"]), Box::new(backend))
            .with_catalog(test_catalog());

        let resp = gateway.complete(&messages()).await.unwrap();
        assert_eq!(resp.content, "from backup");
        assert_eq!(resp.model, "backup");
        let by_model = by_model.lock().unwrap();
        assert_eq!(by_model["primary"], 3);
        assert_eq!(by_model["backup"], 2);
    }

    #[tokio::test]
    async fn whole_chain_exhausted_raises_model_error() {
        let backend = ScriptedBackend::new(vec![
            Err(MaestroError::Network("a".into())),
            Err(MaestroError::Network("b".into())),
            Err(MaestroError::Network("c".into())),
        ]);
        let gateway = LlmGateway::with_backend(
            instant_config(0, &["backup", "last-resort"]),
            Box::new(backend),
        )
        .with_catalog(test_catalog());

        let err = gateway.complete(&messages()).await.unwrap_err();
        let text = err.to_string();
        assert!(matches!(err, MaestroError::Model(_)));
        assert!(text.contains("primary -> backup -> last-resort"));
        // Last per-model error is preserved in the message.
        assert!(text.contains('c'));
    }

    #[tokio::test]
    async fn stream_yields_chunks_then_done() {
        let backend = ScriptedBackend::new(vec![ScriptedBackend::ok("streamed text")]);
        let gateway = LlmGateway::with_backend(instant_config(0, &[]), Box::new(backend))
            .with_catalog(test_catalog());

        let (mut rx, handle) = gateway.stream(&messages()).await.unwrap();
        let mut text = String::new();
        while let Some(chunk) = rx.recv().await {
            match chunk {
                StreamChunk::Text { text: t } => text.push_str(&t),
                StreamChunk::Done => break,
                StreamChunk::Error { message } => panic!("stream error: {message}"),
            }
        }
        assert_eq!(text, "streamed text");
        let final_resp = handle.await.unwrap().unwrap();
        assert_eq!(final_resp.content, "streamed text");
    }

    #[tokio::test]
    async fn pacing_enforces_minimum_interval() {
        let backend = ScriptedBackend::new(vec![
            ScriptedBackend::ok("one"),
            ScriptedBackend::ok("two"),
        ]);
        let mut config = instant_config(0, &[]);
        config.min_request_interval_ms = 40;
        let gateway =
            LlmGateway::with_backend(config, Box::new(backend)).with_catalog(test_catalog());

        let start = Instant::now();
        gateway.complete(&messages()).await.unwrap();
        gateway.complete(&messages()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
