//! The Effect/Observation protocol — how [`crate::runtime`] (pure) talks to
//! [`crate::executor`] (the imperative shell that does I/O).
//!
//! `stepPath` never performs I/O itself; it returns a list of `Effect`s for
//! the executor to carry out. The executor reports back one `Observation`
//! per effect (sometimes zero, for fire-and-forget effects like `Log`), and
//! the runtime folds each one into state via `apply`. Neither type knows how
//! to perform or interpret itself — that asymmetry is the whole point.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A pending tool invocation requested during an LLM turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub input: Value,
}

/// Side effects emitted by the pure execution runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Effect {
    Log {
        level: LogLevel,
        message: String,
    },
    /// Already applied to state; emitted so subscribers (visualization, logs) can observe it.
    UpdateNodeVisit {
        path_id: String,
        node: String,
    },
    InvokeLlm {
        path_id: String,
        model: String,
        system_prompt: String,
        conversation: Vec<Message>,
        tools: Vec<Value>,
        fingerprint: String,
    },
    InvokeTool {
        path_id: String,
        call_id: String,
        tool_name: String,
        input: Value,
        fingerprint: String,
    },
    WriteVfs {
        path: String,
        content: String,
    },
    SpawnPath {
        parent_path_id: String,
        from_node: String,
        to_node: String,
        copy_context: bool,
        priority: i64,
        name: Option<String>,
    },
    TransitionPath {
        path_id: String,
        to_node: String,
        reason: String,
    },
    CompletePath {
        path_id: String,
        reason: String,
    },
    FailPath {
        path_id: String,
        error: String,
    },
    CheckpointRequested {
        label: String,
    },
}

/// Why an LLM turn closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Error,
}

/// A block of LLM output: either prose or a requested tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { call_id: String, tool_name: String, input: Value },
}

/// Scope a timeout fired at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutScope {
    Step,
    Turn,
    Execution,
}

/// Results reported back by the effect executor, folded into state one at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Observation {
    LlmResponse {
        path_id: String,
        content: Vec<ContentBlock>,
        stop_reason: StopReason,
    },
    ToolResult {
        path_id: String,
        call_id: String,
        tool_name: String,
        success: bool,
        output: Value,
        error: Option<String>,
    },
    CancelRequested,
    Timeout {
        scope: TimeoutScope,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_round_trips_through_json() {
        let effect = Effect::TransitionPath {
            path_id: "p0".to_string(),
            to_node: "B".to_string(),
            reason: "single satisfied edge".to_string(),
        };
        let json = serde_json::to_string(&effect).unwrap();
        let restored: Effect = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, effect);
    }

    #[test]
    fn observation_round_trips_through_json() {
        let obs = Observation::LlmResponse {
            path_id: "p0".to_string(),
            content: vec![ContentBlock::Text { text: "ok".to_string() }],
            stop_reason: StopReason::EndTurn,
        };
        let json = serde_json::to_string(&obs).unwrap();
        let restored: Observation = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, obs);
    }
}
