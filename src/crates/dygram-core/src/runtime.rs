//! Execution Runtime (C5) — the pure decision core.
//!
//! `Runtime::step_path` and `Runtime::apply` are the only two operations that
//! touch [`ExecutionState`]. Neither performs I/O; `step_path` returns the
//! effects [`crate::executor::EffectExecutor`] must carry out, and `apply`
//! folds the resulting observations back in. Keeping this boundary exact is
//! what makes the engine replayable: the same `(state, observation)` pair
//! always produces the same next state.
//!
//! ```rust,no_run
//! use dygram_core::runtime::Runtime;
//! use dygram_core::state::{ExecutionState, RunMode};
//!
//! # fn demo(runtime: &Runtime, state: &ExecutionState) {
//! let (next_state, effects) = runtime.step_path(state, "p0");
//! for effect in &effects {
//!     // hand each effect to the effect executor, fold the resulting
//!     // observation back in with `runtime.apply`
//! }
//! # }
//! ```

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::descriptor::NodeDescriptor;
use crate::effect::{Effect, LogLevel, Observation, StopReason};
use crate::machine::Machine;
use crate::state::{ExecutionState, Message, Path, PathStatus, TurnState};
use crate::template::TemplateContext;

/// Reason a path's turn closed or a transition was taken — carried on the
/// `TransitionPath`/`CompletePath`/`FailPath` effects purely for diagnostics.
pub const REASON_SINGLE_EDGE: &str = "single satisfied edge";
pub const REASON_NO_OUTBOUND: &str = "terminal node";
pub const REASON_MERGED: &str = "merged into barrier";
pub const REASON_CANCELLED: &str = "cancelled";
pub const REASON_TIMEOUT: &str = "timeout";
pub const REASON_MAX_TOKENS: &str = "max_tokens";
pub const REASON_LLM_UNAVAILABLE: &str = "llm_unavailable";

/// Bundles the machine snapshot, its derived descriptor cache, and the
/// resolved configuration the runtime needs to make decisions.
pub struct Runtime {
    pub machine: Machine,
    pub descriptors: HashMap<String, NodeDescriptor>,
    pub config: RuntimeConfig,
}

impl Runtime {
    pub fn new(machine: Machine, config: RuntimeConfig) -> Self {
        let descriptors = crate::descriptor::build(&machine);
        Self { machine, descriptors, config }
    }

    /// Rebuild the descriptor cache after `update_definition` swaps the snapshot.
    pub fn rebuild(&mut self, machine: Machine) {
        self.descriptors = crate::descriptor::build(&machine);
        self.machine = machine;
    }

    fn build_context(&self, path: &Path) -> TemplateContext {
        let mut ctx = TemplateContext::new();
        for (name, value) in &path.context_values {
            ctx.insert(name.clone(), value.clone());
        }
        for attr in &self.machine.attributes {
            ctx.insert(attr.name.clone(), attr.value.clone());
        }
        ctx
    }

    /// Advance `path_id` by exactly one unit of work. Never panics; a
    /// structural problem (missing descriptor, ambiguous transition) is
    /// reported as a `FailPath` effect, not a Rust error.
    pub fn step_path(&self, state: &ExecutionState, path_id: &str) -> (ExecutionState, Vec<Effect>) {
        let mut next = state.clone();
        let mut effects = Vec::new();

        let Some(path) = next.path(path_id).cloned() else {
            warn!(path_id, "step_path called for unknown path id");
            return (next, effects);
        };
        if path.is_terminal() {
            return (next, effects);
        }

        let Some(descriptor) = self.descriptors.get(&path.current_node).cloned() else {
            let reason = format!("node '{}' has no descriptor", path.current_node);
            next.path_mut(path_id).unwrap().fail(reason.clone());
            effects.push(Effect::FailPath { path_id: path_id.to_string(), error: reason });
            return (next, effects);
        };

        if self.is_over_budget(&path, &descriptor) {
            let reason = "cycle_detected".to_string();
            next.path_mut(path_id).unwrap().fail(reason.clone());
            effects.push(Effect::FailPath { path_id: path_id.to_string(), error: reason });
            return (next, effects);
        }

        match path.status {
            PathStatus::Active => self.step_active(&mut next, &path, &descriptor, &mut effects),
            PathStatus::AwaitingLlm => self.step_awaiting_llm(&mut next, &path, &mut effects),
            PathStatus::AwaitingToolResult => self.step_awaiting_tool_result(&mut next, &path, &mut effects),
            PathStatus::SuspendedAtBarrier | PathStatus::Completed | PathStatus::Failed => {}
        }

        next.metadata.step_count += 1;
        next.touch();
        (next, effects)
    }

    fn is_over_budget(&self, path: &Path, descriptor: &NodeDescriptor) -> bool {
        path.visit_count(&descriptor.qualified_name) > self.config.cycle_detection_window
    }

    fn step_active(&self, state: &mut ExecutionState, path: &Path, descriptor: &NodeDescriptor, effects: &mut Vec<Effect>) {
        if path.turn_state.is_none() && descriptor.is_task() {
            self.open_turn(state, path, descriptor, effects);
            return;
        }

        // Spawn for every satisfied async edge first; the forking path itself
        // continues past the fork and is still subject to the non-async check below.
        let ctx = self.build_context(path);
        for edge in descriptor.async_edges() {
            if edge.is_satisfied(&ctx) {
                let async_cfg = edge.spawn.clone().unwrap_or_default();
                let child_id = async_cfg.name.clone().unwrap_or_else(|| format!("{}/{}", path.id, edge.target));
                self.register_expected_barrier_participant(state, &edge.target, &child_id);
                effects.push(Effect::SpawnPath {
                    parent_path_id: path.id.clone(),
                    from_node: descriptor.qualified_name.clone(),
                    to_node: edge.target.clone(),
                    copy_context: async_cfg.copy_context,
                    priority: async_cfg.priority,
                    name: async_cfg.name.clone(),
                });
            }
        }

        let satisfied: Vec<_> = descriptor.non_async_edges().filter(|e| e.is_satisfied(&ctx)).collect();

        if satisfied.is_empty() {
            if descriptor.is_terminal() {
                state.path_mut(&path.id).unwrap().complete();
                effects.push(Effect::CompletePath { path_id: path.id.clone(), reason: REASON_NO_OUTBOUND.to_string() });
            }
            // No satisfied edge on a non-terminal node simply stalls this step;
            // the path remains active and may become satisfied once context changes.
            return;
        }

        if satisfied.len() > 1 {
            let reason = format!("ambiguous_transition: {} candidates", satisfied.len());
            state.path_mut(&path.id).unwrap().fail(reason.clone());
            effects.push(Effect::FailPath { path_id: path.id.clone(), error: reason });
            return;
        }

        let edge = satisfied[0];
        if let Some(barrier_cfg) = &edge.barrier {
            self.arrive_at_barrier(state, path, edge.target.clone(), barrier_cfg.clone(), effects);
        } else {
            state.path_mut(&path.id).unwrap().move_to(edge.target.clone());
            effects.push(Effect::UpdateNodeVisit { path_id: path.id.clone(), node: edge.target.clone() });
            effects.push(Effect::TransitionPath {
                path_id: path.id.clone(),
                to_node: edge.target.clone(),
                reason: REASON_SINGLE_EDGE.to_string(),
            });
        }
    }

    /// A path spawned onto `start_node` is only ever expected at a barrier if
    /// `start_node`'s own outbound edge leads straight into one. Registering
    /// it here, before the child path exists, is what lets `arrive_at_barrier`
    /// actually find a non-empty `expected_path_ids` on first arrival.
    fn register_expected_barrier_participant(&self, state: &mut ExecutionState, start_node: &str, child_path_id: &str) {
        let Some(start_descriptor) = self.descriptors.get(start_node) else { return };
        for edge in &start_descriptor.outbound {
            if let Some(barrier_cfg) = &edge.barrier {
                let barrier = state
                    .barriers
                    .entry(barrier_cfg.id.clone())
                    .or_insert_with(|| crate::state::Barrier::new(edge.target.clone(), barrier_cfg.merge));
                barrier.expected_path_ids.insert(child_path_id.to_string());
            }
        }
    }

    fn arrive_at_barrier(
        &self,
        state: &mut ExecutionState,
        path: &Path,
        target: String,
        barrier_cfg: crate::annotation::BarrierConfig,
        effects: &mut Vec<Effect>,
    ) {
        let barrier = state
            .barriers
            .entry(barrier_cfg.id.clone())
            .or_insert_with(|| crate::state::Barrier::new(target.clone(), barrier_cfg.merge));
        barrier.arrived_path_ids.insert(path.id.clone());
        let satisfied = barrier.is_satisfied();
        let merge = barrier.merge;
        let barrier_target = barrier.target_node.clone();

        state.path_mut(&path.id).unwrap().status = PathStatus::SuspendedAtBarrier;
        effects.push(Effect::Log {
            level: LogLevel::Debug,
            message: format!("path {} arrived at barrier {}", path.id, barrier_cfg.id),
        });

        if !satisfied {
            return;
        }

        if merge {
            // The arriving path becomes the single continuation; siblings complete as merged.
            let sibling_ids: Vec<String> = state.barriers[&barrier_cfg.id].arrived_path_ids.iter().cloned().collect();
            for id in &sibling_ids {
                if *id == path.id {
                    continue;
                }
                if let Some(p) = state.path_mut(id) {
                    p.complete();
                }
                effects.push(Effect::CompletePath { path_id: id.clone(), reason: REASON_MERGED.to_string() });
            }
            let winner = state.path_mut(&path.id).unwrap();
            winner.move_to(barrier_target.clone());
            winner.status = PathStatus::Active;
            effects.push(Effect::UpdateNodeVisit { path_id: path.id.clone(), node: barrier_target.clone() });
            effects.push(Effect::TransitionPath {
                path_id: path.id.clone(),
                to_node: barrier_target,
                reason: "barrier merged".to_string(),
            });
        } else {
            let participant_ids: Vec<String> = state.barriers[&barrier_cfg.id].arrived_path_ids.iter().cloned().collect();
            for id in &participant_ids {
                if let Some(p) = state.path_mut(id) {
                    p.move_to(barrier_target.clone());
                    p.status = PathStatus::Active;
                }
                effects.push(Effect::UpdateNodeVisit { path_id: id.clone(), node: barrier_target.clone() });
                effects.push(Effect::TransitionPath {
                    path_id: id.clone(),
                    to_node: barrier_target.clone(),
                    reason: "barrier released".to_string(),
                });
            }
        }
    }

    fn open_turn(&self, state: &mut ExecutionState, path: &Path, descriptor: &NodeDescriptor, effects: &mut Vec<Effect>) {
        let ctx = self.build_context(path);
        let node = self.machine.find_node(&descriptor.qualified_name);
        let prompt_raw = node.and_then(|n| n.attribute("prompt")).and_then(|v| v.as_str()).unwrap_or("").to_string();
        let prompt = crate::template::resolve(&prompt_raw, &ctx);

        let mut tool_names: Vec<String> = descriptor
            .non_async_edges()
            .filter(|e| e.is_satisfied(&ctx))
            .map(|e| format!("transition_to_{}", e.target.replace('.', "_")))
            .collect();
        tool_names.extend(descriptor.static_tool_names.clone());
        if descriptor.meta_enabled {
            tool_names.extend(["get_machine_definition".to_string(), "update_definition".to_string(), "construct_tool".to_string()]);
        }

        let mut turn_state = TurnState::new(descriptor.qualified_name.clone(), tool_names.clone());
        turn_state.conversation.push(Message { role: "user".to_string(), content: serde_json::json!(prompt) });

        let path_mut = state.path_mut(&path.id).unwrap();
        path_mut.status = PathStatus::AwaitingLlm;
        path_mut.turn_state = Some(turn_state.clone());

        let tools: Vec<serde_json::Value> = tool_names.iter().map(|n| serde_json::json!({ "name": n })).collect();
        let fingerprint = crate::fingerprint::request_fingerprint(&self.config.default_model, &prompt, &turn_state.conversation, &tools);

        effects.push(Effect::InvokeLlm {
            path_id: path.id.clone(),
            model: self.config.default_model.clone(),
            system_prompt: prompt,
            conversation: turn_state.conversation.clone(),
            tools,
            fingerprint,
        });
    }

    fn step_awaiting_llm(&self, state: &mut ExecutionState, path: &Path, effects: &mut Vec<Effect>) {
        let Some(turn) = path.turn_state.clone() else { return };
        let Some(stop_reason) = turn.last_stop_reason else {
            // No response folded in yet; nothing to do this step.
            return;
        };

        match stop_reason {
            StopReason::EndTurn => {
                let descriptor = self.descriptors.get(&path.current_node).cloned();
                let Some(descriptor) = descriptor else { return };
                let ctx = self.build_context(path);
                let satisfied: Vec<_> = descriptor.non_async_edges().filter(|e| e.is_satisfied(&ctx)).collect();
                state.path_mut(&path.id).unwrap().turn_state = None;
                if satisfied.len() == 1 {
                    let target = satisfied[0].target.clone();
                    let p = state.path_mut(&path.id).unwrap();
                    p.status = PathStatus::Active;
                    p.move_to(target.clone());
                    effects.push(Effect::UpdateNodeVisit { path_id: path.id.clone(), node: target.clone() });
                    effects.push(Effect::TransitionPath { path_id: path.id.clone(), to_node: target, reason: "turn closed end_turn".to_string() });
                } else {
                    let reason = format!("ambiguous_termination: {} candidates", satisfied.len());
                    state.path_mut(&path.id).unwrap().fail(reason.clone());
                    effects.push(Effect::FailPath { path_id: path.id.clone(), error: reason });
                }
                state.metadata.turn_count += 1;
            }
            StopReason::ToolUse => {
                let pending = turn.pending_tool_invocations.clone();
                if pending.is_empty() {
                    // A tool_use stop reason with no actual tool_use blocks behaves as end_turn.
                    let mut turn = turn;
                    turn.last_stop_reason = Some(StopReason::EndTurn);
                    state.path_mut(&path.id).unwrap().turn_state = Some(turn);
                    self.step_awaiting_llm(state, &state.path(&path.id).unwrap().clone(), effects);
                    return;
                }
                state.path_mut(&path.id).unwrap().status = PathStatus::AwaitingToolResult;
                for call in &pending {
                    let fingerprint = crate::fingerprint::request_fingerprint(
                        &self.config.default_model,
                        &format!("tool:{}", call.tool_name),
                        &[],
                        &[],
                    );
                    effects.push(Effect::InvokeTool {
                        path_id: path.id.clone(),
                        call_id: call.call_id.clone(),
                        tool_name: call.tool_name.clone(),
                        input: call.input.clone(),
                        fingerprint,
                    });
                }
            }
            StopReason::MaxTokens => {
                let reason = REASON_MAX_TOKENS.to_string();
                state.path_mut(&path.id).unwrap().fail(reason.clone());
                effects.push(Effect::FailPath { path_id: path.id.clone(), error: reason });
            }
            StopReason::Error => {
                // executor.rs surfaces a retry-exhausted transport failure (or a
                // playback fingerprint mismatch) as this stop reason — distinct
                // from the model actually running out of tokens.
                let reason = REASON_LLM_UNAVAILABLE.to_string();
                state.path_mut(&path.id).unwrap().fail(reason.clone());
                effects.push(Effect::FailPath { path_id: path.id.clone(), error: reason });
            }
        }
    }

    fn step_awaiting_tool_result(&self, state: &mut ExecutionState, path: &Path, effects: &mut Vec<Effect>) {
        let Some(turn) = path.turn_state.clone() else { return };
        if !turn.pending_tool_calls.is_empty() {
            return;
        }
        // All tool results have been folded in by `apply`; re-open the turn.
        let descriptor = self.descriptors.get(&path.current_node).cloned();
        let Some(descriptor) = descriptor else { return };
        let tools: Vec<serde_json::Value> = turn.available_tools.iter().map(|n| serde_json::json!({ "name": n })).collect();
        let system_prompt = self
            .machine
            .find_node(&descriptor.qualified_name)
            .and_then(|n| n.attribute("prompt"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let fingerprint = crate::fingerprint::request_fingerprint(&self.config.default_model, &system_prompt, &turn.conversation, &tools);

        let mut turn_state = turn;
        turn_state.turn_index += 1;
        turn_state.last_stop_reason = None;
        state.path_mut(&path.id).unwrap().status = PathStatus::AwaitingLlm;
        state.path_mut(&path.id).unwrap().turn_state = Some(turn_state.clone());

        effects.push(Effect::InvokeLlm {
            path_id: path.id.clone(),
            model: self.config.default_model.clone(),
            system_prompt,
            conversation: turn_state.conversation,
            tools,
            fingerprint,
        });
    }

    /// Fold one observation into `state`. Total: never fails, never panics.
    pub fn apply(&self, state: &ExecutionState, observation: &Observation) -> ExecutionState {
        let mut next = state.clone();
        match observation {
            Observation::LlmResponse { path_id, content, stop_reason } => {
                let Some(path) = next.path_mut(path_id) else { return next };
                let Some(turn) = &mut path.turn_state else { return next };
                let mut pending_calls = Vec::new();
                let mut pending_invocations = Vec::new();
                for block in content {
                    if let crate::effect::ContentBlock::ToolUse { call_id, tool_name, input } = block {
                        pending_calls.push(call_id.clone());
                        pending_invocations.push(crate::effect::ToolCall {
                            call_id: call_id.clone(),
                            tool_name: tool_name.clone(),
                            input: input.clone(),
                        });
                    }
                }
                turn.conversation.push(Message {
                    role: "assistant".to_string(),
                    content: serde_json::to_value(content).unwrap_or(serde_json::Value::Null),
                });
                turn.pending_tool_calls = pending_calls;
                turn.pending_tool_invocations = pending_invocations;
                turn.last_stop_reason = Some(*stop_reason);
                debug!(path_id, ?stop_reason, "folded LLM response into path");
            }
            Observation::ToolResult { path_id, call_id, tool_name, output, success, error } => {
                let Some(path) = next.path_mut(path_id) else { return next };
                if *success {
                    if let Some(target) = tool_name.strip_prefix("transition_to_") {
                        // Choosing a transition tool commits the path to that edge
                        // directly — it doesn't fold in as an ordinary tool result
                        // awaiting a later guard-only `end_turn`.
                        let target = target.to_string();
                        path.turn_state = None;
                        path.status = PathStatus::Active;
                        path.move_to(target);
                        debug!(path_id, tool_name, "committed path via transition tool");
                        next.touch();
                        return next;
                    }
                }
                let Some(turn) = &mut path.turn_state else { return next };
                turn.pending_tool_calls.retain(|id| id != call_id);
                turn.pending_tool_invocations.retain(|c| &c.call_id != call_id);
                let payload = if *success {
                    output.clone()
                } else {
                    serde_json::json!({ "error": error.clone().unwrap_or_default() })
                };
                turn.conversation.push(Message {
                    role: "tool".to_string(),
                    content: serde_json::json!({ "call_id": call_id, "success": success, "content": payload }),
                });
            }
            Observation::CancelRequested => {
                next.fail_all_active(REASON_CANCELLED);
            }
            Observation::Timeout { .. } => {
                next.fail_all_active(REASON_TIMEOUT);
            }
        }
        next.touch();
        next
    }
}
