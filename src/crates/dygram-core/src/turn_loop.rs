//! Turn Loop / Machine Executor (C7) — the outermost cooperative scheduler.
//!
//! Everything below this module is pure ([`crate::runtime::Runtime`]) or a
//! narrow side-effect boundary ([`crate::executor::EffectExecutor`]). This is
//! where the two get wired together: pick a path, step it, perform whatever
//! effects fall out, fold the observations back in, and decide — based on
//! the run mode — whether to keep going or hand control back to the caller.
//!
//! ```text
//! ┌────────────┐  step_path   ┌───────────┐  execute(effect)  ┌──────────┐
//! │ ExecutionState├──────────►│ Runtime   ├───────────────────►│ Executor │
//! └────────────┘              └─────┬─────┘                    └────┬─────┘
//!        ▲                          │ effects                       │
//!        │                          ▼                     observations
//!        └──────────────────── apply(observation) ◄───────────────┘
//! ```

use std::collections::HashSet;
use std::time::Instant;

use tracing::{info, warn};

use crate::effect::{Effect, Observation, TimeoutScope};
use crate::executor::EffectExecutor;
use crate::runtime::Runtime;
use crate::state::{ExecutionState, PathStatus, RunMode};

/// Why `advance` returned control to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suspension {
    /// The granularity this call was asked for (one step / one turn / one
    /// path / drain) was reached.
    GranularityReached,
    /// Every remaining path is suspended at a barrier, awaiting input, or terminal.
    NoRunnablePaths,
    /// `metadata.step_count` reached `config.max_steps`.
    StepBudgetExceeded,
    /// A single node was revisited more than `config.max_node_invocations` times.
    NodeInvocationBudgetExceeded,
    /// A wall-clock timeout fired for the given scope.
    TimedOut(TimeoutScope),
    /// Every path is `Completed` or `Failed`.
    ExecutionFinished,
    /// A cancellation was injected mid-run.
    Cancelled,
}

/// Drives [`ExecutionState`] forward through a [`Runtime`] and
/// [`EffectExecutor`] according to a [`RunMode`]-derived granularity.
pub struct MachineExecutor {
    pub runtime: Runtime,
    pub executor: EffectExecutor,
    /// Mirror of `runtime.machine`, kept for `get_machine_definition` to read
    /// without needing its own handle into the runtime. `None` unless a
    /// caller opts in with [`Self::with_machine_snapshot`].
    pub machine_snapshot: Option<std::sync::Arc<std::sync::Mutex<serde_json::Value>>>,
}

impl MachineExecutor {
    pub fn new(runtime: Runtime, executor: EffectExecutor) -> Self {
        Self { runtime, executor, machine_snapshot: None }
    }

    /// Share `snapshot` with a `get_machine_definition` tool handler
    /// registered against the same executor's tool registry; it is kept in
    /// sync every time `update_definition` rebuilds the runtime.
    pub fn with_machine_snapshot(mut self, snapshot: std::sync::Arc<std::sync::Mutex<serde_json::Value>>) -> Self {
        if let Ok(value) = serde_json::to_value(&self.runtime.machine) {
            *snapshot.lock().expect("machine snapshot mutex poisoned") = value;
        }
        self.machine_snapshot = Some(snapshot);
        self
    }

    /// Advance `state` until the granularity implied by its `metadata.mode`
    /// is satisfied, a budget is exhausted, or the execution finishes.
    /// `cancel` is polled once per inner step; returning `true` injects a
    /// cancellation immediately.
    pub async fn advance(&mut self, mut state: ExecutionState, cancel: &dyn Fn() -> bool) -> (ExecutionState, Suspension) {
        let started = Instant::now();
        let mut turns_closed: HashSet<String> = HashSet::new();
        let target_path = match state.metadata.mode {
            RunMode::StepPath => self.next_runnable_path(&state),
            _ => None,
        };

        loop {
            if state.is_complete() {
                return (state, Suspension::ExecutionFinished);
            }
            if cancel() {
                state = self.runtime.apply(&state, &Observation::CancelRequested);
                return (state, Suspension::Cancelled);
            }
            if started.elapsed() > self.runtime.config.execution_timeout {
                state = self.runtime.apply(&state, &Observation::Timeout { scope: TimeoutScope::Execution });
                return (state, Suspension::TimedOut(TimeoutScope::Execution));
            }
            if state.metadata.step_count >= self.runtime.config.max_steps {
                return (state, Suspension::StepBudgetExceeded);
            }

            let Some(path_id) = self.next_runnable_path(&state) else {
                return (state, Suspension::NoRunnablePaths);
            };
            if matches!(state.metadata.mode, RunMode::StepPath) {
                if target_path.as_deref() != Some(path_id.as_str()) {
                    return (state, Suspension::NoRunnablePaths);
                }
            }

            let turn_index_before = state.path(&path_id).and_then(|p| p.turn_state.as_ref()).map(|t| t.turn_index);

            let (next_state, effects) = self.runtime.step_path(&state, &path_id);
            state = next_state;

            for effect in &effects {
                if let Effect::SpawnPath { parent_path_id, to_node, copy_context, priority, name, .. } = effect {
                    self.spawn_path(&mut state, parent_path_id, to_node, *copy_context, *priority, name.as_deref());
                }
            }

            for effect in &effects {
                match effect {
                    Effect::InvokeLlm { path_id, .. } => {
                        let observations = self.executor.execute(effect).await;
                        for observation in &observations {
                            state = self.runtime.apply(&state, observation);
                        }
                        let _ = path_id;
                    }
                    Effect::InvokeTool { tool_name, .. } if tool_name == "update_definition" => {
                        let observations = self.executor.execute(effect).await;
                        for observation in observations {
                            let observation = self.apply_meta_update(observation);
                            state = self.runtime.apply(&state, &observation);
                        }
                    }
                    Effect::InvokeTool { .. } => {
                        let observations = self.executor.execute(effect).await;
                        for observation in &observations {
                            state = self.runtime.apply(&state, observation);
                        }
                    }
                    Effect::CheckpointRequested { label } => {
                        info!(label, "checkpoint requested");
                    }
                    _ => {
                        self.executor.execute(effect).await;
                    }
                }
            }

            if let Some(node_invocations) = self.over_node_invocation_budget(&state, &path_id) {
                let _ = node_invocations;
                return (state, Suspension::NodeInvocationBudgetExceeded);
            }

            let turn_closed = match (turn_index_before, state.path(&path_id).and_then(|p| p.turn_state.as_ref())) {
                (Some(before), Some(turn)) => turn.turn_index != before,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if turn_closed {
                turns_closed.insert(path_id.clone());
            }

            match state.metadata.mode {
                RunMode::Step => return (state, Suspension::GranularityReached),
                RunMode::StepTurn => {
                    if turns_closed.contains(&path_id) || state.path(&path_id).map(|p| p.is_terminal()).unwrap_or(true) {
                        return (state, Suspension::GranularityReached);
                    }
                }
                RunMode::StepPath => {
                    if state.path(&path_id).map(|p| p.is_terminal() || p.status == PathStatus::SuspendedAtBarrier).unwrap_or(true) {
                        return (state, Suspension::GranularityReached);
                    }
                }
                RunMode::Interactive | RunMode::Playback => {
                    // Keep draining until nothing is runnable or the execution ends.
                }
            }
        }
    }

    /// `update_definition` asks the tool registry to hand back a candidate
    /// machine; validate it and, if sound, atomically swap the runtime's
    /// snapshot and rebuild its descriptor cache. An invalid candidate
    /// downgrades the observation to a failed tool result — the snapshot the
    /// runtime is driving off of never changes underneath a bad request.
    fn apply_meta_update(&mut self, observation: Observation) -> Observation {
        let Observation::ToolResult { path_id, call_id, tool_name, success, output, error } = observation else {
            return observation;
        };
        if !success {
            return Observation::ToolResult { path_id, call_id, tool_name, success, output, error };
        }
        let candidate: Result<crate::machine::Machine, _> = serde_json::from_value(output.clone());
        match candidate {
            Ok(machine) => match machine.validate() {
                Ok(()) => {
                    info!(title = %machine.title, "machine definition updated");
                    if let Some(snapshot) = &self.machine_snapshot {
                        if let Ok(value) = serde_json::to_value(&machine) {
                            *snapshot.lock().expect("machine snapshot mutex poisoned") = value;
                        }
                    }
                    self.runtime.rebuild(machine);
                    Observation::ToolResult { path_id, call_id, tool_name, success: true, output, error: None }
                }
                Err(reason) => {
                    warn!(reason, "rejected update_definition: failed validation");
                    Observation::ToolResult { path_id, call_id, tool_name, success: false, output: serde_json::Value::Null, error: Some(reason) }
                }
            },
            Err(e) => {
                warn!(error = %e, "rejected update_definition: not a machine definition");
                Observation::ToolResult {
                    path_id,
                    call_id,
                    tool_name,
                    success: false,
                    output: serde_json::Value::Null,
                    error: Some(format!("not a valid machine definition: {e}")),
                }
            }
        }
    }

    fn next_runnable_path(&self, state: &ExecutionState) -> Option<String> {
        state
            .paths
            .iter()
            .filter(|p| matches!(p.status, PathStatus::Active | PathStatus::AwaitingLlm | PathStatus::AwaitingToolResult))
            .max_by_key(|p| p.priority)
            .map(|p| p.id.clone())
    }

    fn over_node_invocation_budget(&self, state: &ExecutionState, path_id: &str) -> Option<usize> {
        let path = state.path(path_id)?;
        let count = path.visit_count(&path.current_node);
        if count as u64 > self.runtime.config.max_node_invocations {
            Some(count)
        } else {
            None
        }
    }

    fn spawn_path(
        &self,
        state: &mut ExecutionState,
        parent_path_id: &str,
        to_node: &str,
        copy_context: bool,
        priority: i64,
        name: Option<&str>,
    ) {
        let Some(parent) = state.path(parent_path_id).cloned() else {
            warn!(parent_path_id, "SpawnPath effect referenced unknown parent path");
            return;
        };
        let new_id = name.map(|n| n.to_string()).unwrap_or_else(|| format!("{parent_path_id}/{to_node}"));
        let mut child = crate::state::Path::new(new_id, to_node);
        child.priority = priority;
        if copy_context {
            child.context_values = parent.context_values.clone();
        }
        state.paths.push(child);
    }
}
