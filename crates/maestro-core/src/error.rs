use thiserror::Error;

/// A convenience `Result` alias using [`MaestroError`].
pub type MaestroResult<T> = Result<T, MaestroError>;

/// Top-level error type for the Maestro task engine.
///
/// Each variant corresponds to a failure class with its own handling
/// policy: validation errors surface immediately, rate-limit and network
/// errors are retried with backoff, model errors are terminal for a
/// gateway call, and task errors are recorded on the task instead of
/// propagating.
#[derive(Debug, Error)]
pub enum MaestroError {
    /// Malformed input (empty message set, unknown model, bad spec).
    /// Never retried; surfaced immediately to the caller.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The remote service answered with an HTTP 429 equivalent.
    /// Retried with backoff before engaging model fallback.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Transport failure or timeout on an outbound request. Retryable.
    #[error("Network error: {0}")]
    Network(String),

    /// Every model in the fallback chain was exhausted.
    #[error("Model error: {0}")]
    Model(String),

    /// A token budget target is unreachable even after maximal
    /// compression. Not retried.
    #[error("Compression overflow: {0}")]
    CompressionOverflow(String),

    /// A failure inside task execution, caught at the orchestrator
    /// boundary and recorded on the task.
    #[error("Task error: {0}")]
    Task(String),

    /// Lookup of an unknown task id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Determines whether an error is transient and worth retrying.
///
/// Only rate-limit and network/timeout failures qualify. Validation
/// errors are never retried, and everything else is either terminal for
/// the call or a programming error.
pub fn is_retryable(err: &MaestroError) -> bool {
    matches!(
        err,
        MaestroError::RateLimited(_) | MaestroError::Network(_)
    )
}
