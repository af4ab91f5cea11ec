//! Error types for the LLM transport implementations.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors a [`crate::live::ClaudeTransport`] (or any future transport) can raise.
/// Never surfaced directly to the engine — `dygram-core`'s effect executor
/// only sees `anyhow::Error` and applies its retry policy on top.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("API key not found: {0}")]
    ApiKeyNotFound(String),

    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("invalid response from provider: {0}")]
    InvalidResponse(String),

    #[error("provider error: {0}")]
    Provider(String),
}

impl TransportError {
    /// Whether the effect executor's retry policy should give this error
    /// another attempt before surfacing `llm_unavailable`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Http(_) | TransportError::RateLimitExceeded(_))
    }
}
