//! Resilient client for a remote text-completion/streaming service.
//!
//! The gateway owns the resilience policy for outbound LLM traffic:
//! exponential backoff with jitter on transient failures, ordered model
//! fallback once a model's retry budget is exhausted, and a minimum
//! inter-request delay enforced per gateway instance.
//!
//! # Main types
//!
//! - [`LlmGateway`] — Retry/fallback/pacing wrapper around a backend.
//! - [`CompletionBackend`] — Provider abstraction; [`HttpBackend`] is the
//!   shipped OpenAI-compatible implementation.
//! - [`GatewayConfig`] / [`RetryPolicy`] — Wire and resilience settings.
//! - [`LlmResponse`] — Token-accounted result of one gateway call.

/// Provider abstraction and the HTTP implementation.
pub mod backend;
/// Gateway and retry configuration.
pub mod config;
/// The resilient gateway itself.
pub mod gateway;

pub use backend::{ChatRequest, CompletionBackend, CompletionResponse, HttpBackend, StreamChunk};
pub use config::{GatewayConfig, RetryPolicy};
pub use gateway::{LlmGateway, LlmResponse};
