use crate::config::GatewayConfig;
use async_trait::async_trait;
use futures_util::StreamExt;
use maestro_core::{ChatMessage, MaestroError, MaestroResult, Role};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One outbound completion request, already resolved to a concrete
/// model (the gateway rewrites `model` as it walks the fallback chain).
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model identifier to invoke.
    pub model: String,
    /// Ordered conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: u32,
}

/// Raw backend result before the gateway layers on accounting.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated text.
    pub content: String,
    /// Prompt tokens billed by the provider (0 when not reported).
    pub prompt_tokens: u32,
    /// Completion tokens billed by the provider (0 when not reported).
    pub completion_tokens: u32,
}

/// One element of a streamed completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// A fragment of generated text.
    Text {
        /// The fragment.
        text: String,
    },
    /// The stream finished successfully.
    Done,
    /// The stream broke mid-flight.
    Error {
        /// Human-readable cause.
        message: String,
    },
}

/// Provider abstraction for the completion service.
///
/// Implementations map provider failures onto the error taxonomy:
/// `RateLimited` for 429s, `Validation` for malformed-request answers,
/// `Network` for transport failures and timeouts. The gateway decides
/// what is retried; backends never retry on their own.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Non-streaming completion.
    async fn complete(&self, request: &ChatRequest) -> MaestroResult<CompletionResponse>;

    /// Streaming completion: a finite, non-restartable chunk receiver
    /// plus a handle resolving to the aggregated response. Dropping the
    /// receiver abandons the transfer and releases the connection.
    async fn stream(
        &self,
        request: &ChatRequest,
    ) -> MaestroResult<(
        mpsc::Receiver<StreamChunk>,
        JoinHandle<MaestroResult<CompletionResponse>>,
    )>;
}

/// OpenAI-compatible HTTP backend.
///
/// Works against OpenAI, OpenRouter, Groq, and any other provider
/// implementing the chat completions API.
pub struct HttpBackend {
    base_url: String,
    credential: String,
    http: reqwest::Client,
}

impl HttpBackend {
    /// Build from gateway config; the per-request timeout is baked into
    /// the HTTP client.
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            base_url: config.base_url().to_string(),
            credential: config.credential.clone(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_default(),
        }
    }

    fn build_body(request: &ChatRequest, stream: bool) -> serde_json::Value {
        let api_messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": match m.role {
                        Role::User | Role::Tool => "user",
                        Role::Assistant => "assistant",
                        Role::System => "system",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": api_messages,
        });
        if stream {
            body["stream"] = serde_json::json!(true);
        }
        body
    }

    fn map_transport_error(e: reqwest::Error) -> MaestroError {
        if e.is_timeout() {
            MaestroError::Network(format!("request timed out: {e}"))
        } else {
            MaestroError::Network(e.to_string())
        }
    }

    fn map_status(status: reqwest::StatusCode, body: &str) -> MaestroError {
        match status.as_u16() {
            429 => MaestroError::RateLimited(format!("API answered 429: {body}")),
            400 | 422 => MaestroError::Validation(format!("API rejected request: {body}")),
            _ => MaestroError::Network(format!("API error {status}: {body}")),
        }
    }
}

#[async_trait]
impl CompletionBackend for HttpBackend {
    async fn complete(&self, request: &ChatRequest) -> MaestroResult<CompletionResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = Self::build_body(request, false);

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.credential))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &text));
        }

        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MaestroError::Network(e.to_string()))?;

        let content = resp_body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                MaestroError::Network("missing choices[0].message.content in response".into())
            })?
            .to_string();

        Ok(CompletionResponse {
            content,
            prompt_tokens: resp_body["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: resp_body["usage"]["completion_tokens"].as_u64().unwrap_or(0)
                as u32,
        })
    }

    async fn stream(
        &self,
        request: &ChatRequest,
    ) -> MaestroResult<(
        mpsc::Receiver<StreamChunk>,
        JoinHandle<MaestroResult<CompletionResponse>>,
    )> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = Self::build_body(request, true);

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.credential))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &text));
        }

        let (tx, rx) = mpsc::channel::<StreamChunk>(64);
        let mut byte_stream = resp.bytes_stream();

        let handle = tokio::spawn(async move {
            let mut buffer = String::new();
            let mut full_text = String::new();
            let mut prompt_tokens = 0u32;
            let mut completion_tokens = 0u32;

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let message = format!("stream read error: {e}");
                        let _ = tx.send(StreamChunk::Error { message: message.clone() }).await;
                        return Err(MaestroError::Network(message));
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        let _ = tx.send(StreamChunk::Done).await;
                        continue;
                    }

                    let event: serde_json::Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };

                    if let Some(text) = event["choices"][0]["delta"]["content"].as_str() {
                        full_text.push_str(text);
                        if tx
                            .send(StreamChunk::Text { text: text.to_string() })
                            .await
                            .is_err()
                        {
                            // Receiver dropped: the consumer abandoned
                            // the stream. Stop reading so the connection
                            // is released.
                            return Ok(CompletionResponse {
                                content: full_text,
                                prompt_tokens,
                                completion_tokens,
                            });
                        }
                    }
                    if let Some(v) = event["usage"]["prompt_tokens"].as_u64() {
                        prompt_tokens = v as u32;
                    }
                    if let Some(v) = event["usage"]["completion_tokens"].as_u64() {
                        completion_tokens = v as u32;
                    }
                }
            }

            Ok(CompletionResponse {
                content: full_text,
                prompt_tokens,
                completion_tokens,
            })
        });

        Ok((rx, handle))
    }
}
