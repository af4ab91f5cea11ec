//! `ExecutionState` — the one piece of mutable data the runtime owns.
//!
//! An execution is a set of [`Path`]s walking the same machine snapshot
//! independently, synchronising only at named [`Barrier`]s. The whole value
//! is plain data: no handles, no channels, nothing that doesn't serialize.
//! That's what lets [`crate::runtime`] stay pure and [`dygram_checkpoint`]
//! persist it between CLI invocations without the engine's cooperation.
//!
//! # Example
//!
//! ```rust
//! use dygram_core::state::{ExecutionState, Path, PathStatus, RunMode};
//!
//! let mut state = ExecutionState::new(RunMode::Interactive, "deadbeef");
//! state.paths.push(Path::new("p0", "start"));
//! assert_eq!(state.paths[0].status, PathStatus::Active);
//! assert_eq!(state.metadata.step_count, 0);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of one [`Path`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStatus {
    Active,
    SuspendedAtBarrier,
    AwaitingLlm,
    AwaitingToolResult,
    Completed,
    Failed,
}

/// One message in a task node's in-progress conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: Value,
}

/// State of an in-flight LLM turn at a task node. Present on a `Path` only
/// while a turn is open; cleared once the turn closes with `end_turn`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnState {
    pub node_name: String,
    pub turn_index: u64,
    pub step_index: u64,
    pub conversation: Vec<Message>,
    pub available_tools: Vec<String>,
    /// Set by `apply` once an `LLMResponse` observation has been folded in;
    /// consumed by the next `stepPath` call to decide how the turn proceeds.
    pub last_stop_reason: Option<crate::effect::StopReason>,
    /// Tool call ids still awaiting a `ToolResult` observation.
    pub pending_tool_calls: Vec<String>,
    /// `(call_id, tool_name, input)` for every pending call, so `stepPath`
    /// can emit one `InvokeTool` effect per call without re-parsing the
    /// conversation history.
    pub pending_tool_invocations: Vec<crate::effect::ToolCall>,
}

impl TurnState {
    pub fn new(node_name: impl Into<String>, available_tools: Vec<String>) -> Self {
        Self {
            node_name: node_name.into(),
            turn_index: 0,
            step_index: 0,
            conversation: Vec::new(),
            available_tools,
            last_stop_reason: None,
            pending_tool_calls: Vec::new(),
            pending_tool_invocations: Vec::new(),
        }
    }
}

/// An independent cursor into the machine graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub id: String,
    pub status: PathStatus,
    pub current_node: String,
    pub visited: Vec<String>,
    pub context_values: BTreeMap<String, Value>,
    pub turn_state: Option<TurnState>,
    pub priority: i64,
    pub failure_reason: Option<String>,
}

impl Path {
    pub fn new(id: impl Into<String>, start_node: impl Into<String>) -> Self {
        let start_node = start_node.into();
        Self {
            id: id.into(),
            status: PathStatus::Active,
            visited: vec![start_node.clone()],
            current_node: start_node,
            context_values: BTreeMap::new(),
            turn_state: None,
            priority: 0,
            failure_reason: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, PathStatus::Completed | PathStatus::Failed)
    }

    /// Number of times `node` appears in `visited`, for cycle detection.
    pub fn visit_count(&self, node: &str) -> usize {
        self.visited.iter().filter(|n| n.as_str() == node).count()
    }

    /// Move to `node`, recording the visit. Does not touch turn state or status.
    pub fn move_to(&mut self, node: impl Into<String>) {
        let node = node.into();
        self.current_node = node.clone();
        self.visited.push(node);
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = PathStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.turn_state = None;
    }

    pub fn complete(&mut self) {
        self.status = PathStatus::Completed;
        self.turn_state = None;
    }
}

/// A named rendezvous where one or more paths wait until every expected
/// participant has arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Barrier {
    pub expected_path_ids: BTreeSet<String>,
    pub arrived_path_ids: BTreeSet<String>,
    pub merge: bool,
    pub target_node: String,
}

impl Barrier {
    pub fn new(target_node: impl Into<String>, merge: bool) -> Self {
        Self {
            expected_path_ids: BTreeSet::new(),
            arrived_path_ids: BTreeSet::new(),
            merge,
            target_node: target_node.into(),
        }
    }

    /// A barrier releases once every expected participant has arrived.
    /// An empty `expected_path_ids` never releases on its own — the caller
    /// is responsible for registering participants before paths can arrive.
    pub fn is_satisfied(&self) -> bool {
        !self.expected_path_ids.is_empty() && self.expected_path_ids.is_subset(&self.arrived_path_ids)
    }
}

/// Step/turn granularity the turn loop is driven at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    Interactive,
    Step,
    StepTurn,
    StepPath,
    Playback,
}

/// Progress counters and bookkeeping that live alongside the paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub step_count: u64,
    pub turn_count: u64,
    pub error_count: u64,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub mode: RunMode,
}

impl ExecutionMetadata {
    pub fn new(mode: RunMode) -> Self {
        let now = Utc::now();
        Self {
            step_count: 0,
            turn_count: 0,
            error_count: 0,
            started_at: now,
            last_updated: now,
            mode,
        }
    }
}

/// The machine JSON an execution started from, plus its content hash —
/// carried alongside the state so resume can detect drift without a second
/// round trip through `dygram-checkpoint`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub machine: Value,
    pub hash: String,
}

/// The entire mutable state of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub paths: Vec<Path>,
    pub barriers: BTreeMap<String, Barrier>,
    pub metadata: ExecutionMetadata,
    pub machine_snapshot: MachineSnapshot,
}

impl ExecutionState {
    pub fn new(mode: RunMode, machine_hash: impl Into<String>) -> Self {
        Self {
            paths: Vec::new(),
            barriers: BTreeMap::new(),
            metadata: ExecutionMetadata::new(mode),
            machine_snapshot: MachineSnapshot {
                machine: Value::Null,
                hash: machine_hash.into(),
            },
        }
    }

    pub fn path(&self, id: &str) -> Option<&Path> {
        self.paths.iter().find(|p| p.id == id)
    }

    pub fn path_mut(&mut self, id: &str) -> Option<&mut Path> {
        self.paths.iter_mut().find(|p| p.id == id)
    }

    pub fn active_paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().filter(|p| !p.is_terminal())
    }

    /// Every non-terminal path is terminal — the run is over either way.
    pub fn is_complete(&self) -> bool {
        !self.paths.is_empty() && self.paths.iter().all(|p| p.is_terminal())
    }

    /// Fail every non-terminal path with `reason`. Used for cancellation and timeouts.
    pub fn fail_all_active(&mut self, reason: &str) {
        for path in self.paths.iter_mut().filter(|p| !p.is_terminal()) {
            path.fail(reason.to_string());
        }
        self.metadata.last_updated = Utc::now();
    }

    pub fn touch(&mut self) {
        self.metadata.last_updated = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_path_is_active_and_visited_once() {
        let path = Path::new("p0", "start");
        assert_eq!(path.status, PathStatus::Active);
        assert_eq!(path.visit_count("start"), 1);
    }

    #[test]
    fn move_to_appends_to_visited() {
        let mut path = Path::new("p0", "A");
        path.move_to("B");
        path.move_to("A");
        assert_eq!(path.current_node, "A");
        assert_eq!(path.visit_count("A"), 2);
    }

    #[test]
    fn barrier_not_satisfied_until_all_expected_arrive() {
        let mut barrier = Barrier::new("D", true);
        barrier.expected_path_ids.insert("p1".to_string());
        barrier.expected_path_ids.insert("p2".to_string());
        barrier.arrived_path_ids.insert("p1".to_string());
        assert!(!barrier.is_satisfied());
        barrier.arrived_path_ids.insert("p2".to_string());
        assert!(barrier.is_satisfied());
    }

    #[test]
    fn empty_barrier_never_satisfies_itself() {
        let barrier = Barrier::new("D", true);
        assert!(!barrier.is_satisfied());
    }

    #[test]
    fn is_complete_requires_every_path_terminal() {
        let mut state = ExecutionState::new(RunMode::Step, "h");
        state.paths.push(Path::new("p0", "A"));
        assert!(!state.is_complete());
        state.paths[0].complete();
        assert!(state.is_complete());
    }

    #[test]
    fn fail_all_active_leaves_terminal_paths_untouched() {
        let mut state = ExecutionState::new(RunMode::Step, "h");
        state.paths.push(Path::new("p0", "A"));
        state.paths.push(Path::new("p1", "B"));
        state.paths[1].complete();
        state.fail_all_active("cancelled");
        assert_eq!(state.paths[0].status, PathStatus::Failed);
        assert_eq!(state.paths[0].failure_reason.as_deref(), Some("cancelled"));
        assert_eq!(state.paths[1].status, PathStatus::Completed);
    }

    #[test]
    fn serialization_round_trips() {
        let mut state = ExecutionState::new(RunMode::Interactive, "abc123");
        state.paths.push(Path::new("p0", "start"));
        let json = serde_json::to_string(&state).unwrap();
        let restored: ExecutionState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.paths, state.paths);
        assert_eq!(restored.machine_snapshot.hash, state.machine_snapshot.hash);
    }
}
