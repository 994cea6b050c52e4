//! Integration tests for the gateway over a real HTTP boundary.

use maestro_budget::{ModelCatalog, ModelSpec};
use maestro_core::{ChatMessage, MaestroError};
use maestro_llm::{GatewayConfig, LlmGateway, RetryPolicy, StreamChunk};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn catalog() -> ModelCatalog {
    let mut catalog = ModelCatalog::with_default(ModelSpec {
        context_window: 8_192,
        chars_per_token: 4.0,
    });
    for name in ["primary", "backup"] {
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

fn config(server: &MockServer, max_retries: u32, fallbacks: &[&str]) -> GatewayConfig {
    let mut config = GatewayConfig::new("primary", "test-credential");
    config.api_base_url = Some(server.uri());
    config.retry = RetryPolicy::instant(max_retries);
    config.min_request_interval_ms = 0;
    config.fallback_models = fallbacks.iter().map(|s| (*s).to_string()).collect();
    config
}

fn completion_body(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 12, "completion_tokens": 7},
    })
}

#[tokio::test]
async fn success_carries_token_accounting_and_bearer_credential() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test-credential"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("hello back")))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = LlmGateway::new(config(&server, 0, &[])).with_catalog(catalog());
    let resp = gateway
        .complete(&[ChatMessage::user("hello")])
        .await
        .unwrap();

    assert_eq!(resp.content, "hello back");
    assert_eq!(resp.prompt_tokens, 12);
    assert_eq!(resp.completion_tokens, 7);
    assert_eq!(resp.tokens_used, 19);
    assert_eq!(resp.model, "primary");
    assert_eq!(resp.retries, 0);
}

#[tokio::test]
async fn rate_limited_twice_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("too many requests"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("third time")))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = LlmGateway::new(config(&server, 3, &[])).with_catalog(catalog());
    let resp = gateway
        .complete(&[ChatMessage::user("hello")])
        .await
        .unwrap();

    assert_eq!(resp.content, "third time");
    assert_eq!(resp.retries, 2);
}

#[tokio::test]
async fn bad_request_surfaces_as_validation_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("malformed"))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = LlmGateway::new(config(&server, 3, &[])).with_catalog(catalog());
    let err = gateway
        .complete(&[ChatMessage::user("hello")])
        .await
        .unwrap_err();
    assert!(matches!(err, MaestroError::Validation(_)));
}

#[tokio::test]
async fn server_errors_exhaust_primary_then_fall_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({"model": "primary"})))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({"model": "backup"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("rescued")))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = LlmGateway::new(config(&server, 1, &["backup"])).with_catalog(catalog());
    let resp = gateway
        .complete(&[ChatMessage::user("hello")])
        .await
        .unwrap();

    assert_eq!(resp.content, "rescued");
    assert_eq!(resp.model, "backup");
}

#[tokio::test]
async fn whole_chain_down_raises_model_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let gateway = LlmGateway::new(config(&server, 0, &["backup"])).with_catalog(catalog());
    let err = gateway
        .complete(&[ChatMessage::user("hello")])
        .await
        .unwrap_err();
    assert!(matches!(err, MaestroError::Model(_)));
    assert!(err.to_string().contains("primary -> backup"));
}

#[tokio::test]
async fn streaming_parses_sse_chunks() {
    let server = MockServer::start().await;
    let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
               data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
               data: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = LlmGateway::new(config(&server, 0, &[])).with_catalog(catalog());
    let (mut rx, handle) = gateway.stream(&[ChatMessage::user("hi")]).await.unwrap();

    let mut text = String::new();
    let mut saw_done = false;
    while let Some(chunk) = rx.recv().await {
        match chunk {
            StreamChunk::Text { text: t } => text.push_str(&t),
            StreamChunk::Done => saw_done = true,
            StreamChunk::Error { message } => panic!("stream error: {message}"),
        }
    }
    assert_eq!(text, "Hello");
    assert!(saw_done);

    let final_resp = handle.await.unwrap().unwrap();
    assert_eq!(final_resp.content, "Hello");
}
