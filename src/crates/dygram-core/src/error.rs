//! Error types for machine construction and execution.
//!
//! `EngineError` is the one error type the engine ever returns from a fallible
//! constructor or CLI-facing call. It is deliberately *not* the vehicle for the
//! recoverable failures (`ToolError`, `GuardEvaluationError`,
//! `TemplateResolutionError`) — those never leave the effect executor; they are
//! folded back into the conversation or logged at `warn` and never surface here.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Structural errors surfaced to the CLI as an exit-code-1 diagnostic.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Machine JSON fails a structural invariant (unresolved name, no logical start, …).
    #[error("invalid machine definition: {0}")]
    InputError(String),

    /// A path had more than one satisfied outbound edge at a non-task node.
    #[error("path {path_id} at node '{node}': ambiguous transition ({candidates} edges satisfied)")]
    AmbiguousTransition {
        path_id: String,
        node: String,
        candidates: usize,
    },

    /// A path's turn closed with `end_turn` but no single outbound edge was satisfied.
    #[error("path {path_id} at node '{node}': ambiguous termination ({candidates} edges satisfied)")]
    AmbiguousTermination {
        path_id: String,
        node: String,
        candidates: usize,
    },

    /// LLM transport exhausted its retry budget.
    #[error("path {path_id}: LLM transport unavailable after retries: {source}")]
    LlmUnavailable {
        path_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// A budget (`maxSteps`, `maxNodeInvocations`, cycle window, timeout) was exceeded.
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    /// `update_definition` received a machine shape that fails a structural
    /// invariant; the snapshot is left unchanged.
    #[error("rejected machine update: {0}")]
    InvalidMachineUpdate(String),

    /// Persistence layer failure (load/save/drift/recording).
    #[error("persistence error: {0}")]
    Checkpoint(#[from] dygram_checkpoint::CheckpointError),

    /// JSON (de)serialization failure on a machine or state payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Execution was cancelled.
    #[error("execution cancelled")]
    Cancelled,
}
