//! Error type for the tool handlers this crate provides.
//!
//! Nothing here ever reaches `dygram-core`: a [`ToolError`] is converted to
//! a `ToolOutcome::err` at the call site, which the turn loop folds in as a
//! recoverable `tool_result { success: false }` the LLM can see and react to.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolError>;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path '{0}' escapes the sandboxed virtual filesystem root")]
    SandboxViolation(String),

    #[error("invalid tool input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
