//! On-disk shape of an execution record (§4.8, §6).
//!
//! An execution record is generic over the persisted state type `S` so that
//! this crate has no dependency on `dygram-core`; the engine instantiates
//! [`ExecutionStore<S>`] with its own `ExecutionState`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The granularity at which the turn loop was driven for this execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    Interactive,
    Step,
    StepTurn,
    StepPath,
    Playback,
}

/// Terminal or in-flight status of an execution, mirrored in `metadata.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    /// Every active path is blocked on a barrier or external input.
    Suspended { reason: String },
    Completed,
    Failed { reason: String },
}

/// `metadata.json` — identity and progress of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub id: String,
    pub machine_file: Option<String>,
    pub machine_hash: String,
    pub started_at: DateTime<Utc>,
    pub last_executed_at: DateTime<Utc>,
    pub turn_count: u64,
    pub step_count: u64,
    pub status: ExecutionStatus,
    pub mode: ExecutionMode,
    #[serde(default)]
    pub client_config: Value,
}

impl ExecutionMetadata {
    pub fn new(id: impl Into<String>, mode: ExecutionMode, machine_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            machine_file: None,
            machine_hash: machine_hash.into(),
            started_at: now,
            last_executed_at: now,
            turn_count: 0,
            step_count: 0,
            status: ExecutionStatus::Running,
            mode,
            client_config: Value::Null,
        }
    }

    pub fn touch(&mut self) {
        self.last_executed_at = Utc::now();
    }
}

/// One line of `history.jsonl` — a closed LLM turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub turn: u64,
    pub timestamp: DateTime<Utc>,
    pub node: String,
    pub tools: Vec<String>,
    pub output: Value,
    pub status: String,
}

/// A fully loaded execution: state, metadata, and the machine it was launched with.
#[derive(Debug, Clone)]
pub struct ExecutionRecord<S> {
    pub state: S,
    pub metadata: ExecutionMetadata,
    pub machine_snapshot: Value,
}
