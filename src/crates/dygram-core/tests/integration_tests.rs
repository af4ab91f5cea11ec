//! End-to-end scenarios driving [`MachineExecutor`] over a full
//! `Runtime` + `EffectExecutor` pair, the way `dygram-cli` wires them
//! together for a real run.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dygram_core::config::RuntimeConfig;
use dygram_core::effect::{ContentBlock, StopReason};
use dygram_core::executor::{EffectExecutor, LlmRequest, LlmResponsePayload, LlmTransport};
use dygram_core::machine::{Annotation, Attribute, Edge, LabelPart, LabelValue, Machine, Node, Segment};
use dygram_core::runtime::Runtime;
use dygram_core::state::{ExecutionState, Path, PathStatus, RunMode};
use dygram_core::tool::{ToolDescriptor, ToolHandler, ToolOutcome, ToolRegistry};
use dygram_core::turn_loop::{MachineExecutor, Suspension};

fn node(name: &str, node_type: Option<&str>) -> Node {
    Node { name: name.to_string(), node_type: node_type.map(String::from), title: None, annotations: vec![], attributes: vec![], nodes: vec![] }
}

fn arrow(source: &str, target: &str) -> Edge {
    Edge { source: source.to_string(), segments: vec![Segment { target: target.to_string(), label: vec![], end_type: "arrow".into() }] }
}

/// A transport that replays a fixed sequence of responses, one per call,
/// and errors if asked for more than were scripted.
struct ScriptedTransport {
    responses: Mutex<std::vec::IntoIter<LlmResponsePayload>>,
}

impl ScriptedTransport {
    fn new(responses: Vec<LlmResponsePayload>) -> Self {
        Self { responses: Mutex::new(responses.into_iter()) }
    }
}

#[async_trait]
impl LlmTransport for ScriptedTransport {
    async fn invoke_with_tools(&self, _request: LlmRequest) -> anyhow::Result<LlmResponsePayload> {
        self.responses.lock().expect("scripted transport mutex poisoned").next().ok_or_else(|| anyhow::anyhow!("scripted transport exhausted"))
    }
}

struct RecordingTool {
    calls: Arc<Mutex<Vec<serde_json::Value>>>,
}

#[async_trait]
impl ToolHandler for RecordingTool {
    async fn call(&self, input: serde_json::Value) -> ToolOutcome {
        self.calls.lock().expect("recording tool mutex poisoned").push(input.clone());
        ToolOutcome::ok(serde_json::json!({ "received": input }))
    }
}

/// Stand-in for `dygram_tooling::UpdateDefinitionTool`: passes a candidate
/// through once it deserializes as a `Machine`. Kept local to this test
/// crate rather than depending on `dygram-tooling`, which itself depends on
/// `dygram-core`.
struct UpdateDefinitionTool;

#[async_trait]
impl ToolHandler for UpdateDefinitionTool {
    async fn call(&self, input: serde_json::Value) -> ToolOutcome {
        match serde_json::from_value::<Machine>(input.clone()) {
            Ok(_) => ToolOutcome::ok(input),
            Err(e) => ToolOutcome::err(format!("candidate definition is not shaped like a machine: {e}")),
        }
    }
}

fn executor_with(machine: Machine, transport: Box<dyn LlmTransport>, tools: ToolRegistry, config: RuntimeConfig) -> MachineExecutor {
    let runtime = Runtime::new(machine, config);
    let effect_executor = EffectExecutor::new(transport, tools);
    MachineExecutor::new(runtime, effect_executor)
}

/// A task node that calls a registered tool, then closes the turn with
/// `end_turn` once the tool result comes back, should land on the single
/// outbound edge from that node.
#[tokio::test]
async fn task_pipeline_calls_a_tool_then_transitions_on_end_turn() {
    let mut machine = Machine { title: "pipeline".into(), annotations: vec![], attributes: vec![], nodes: vec![], edges: vec![] };
    machine.nodes.push(node("start", Some("init")));
    let mut ask = node("ask", Some("task"));
    ask.attributes.push(Attribute { name: "prompt".into(), type_hint: None, value: serde_json::json!("summarise the input") });
    machine.nodes.push(ask);
    machine.nodes.push(node("done", Some("state")));
    machine.edges.push(arrow("start", "ask"));
    machine.edges.push(arrow("ask", "done"));

    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut tools = ToolRegistry::new();
    tools.register_transition_family();
    tools.register_static(
        ToolDescriptor { name: "summarise".into(), description: "summarise text".into(), input_schema: serde_json::json!({}) },
        Arc::new(RecordingTool { calls: calls.clone() }),
    );

    let transport = ScriptedTransport::new(vec![
        LlmResponsePayload {
            content: vec![ContentBlock::ToolUse { call_id: "c1".into(), tool_name: "summarise".into(), input: serde_json::json!({"text": "hi"}) }],
            stop_reason: StopReason::ToolUse,
        },
        LlmResponsePayload { content: vec![ContentBlock::Text { text: "done summarising".into() }], stop_reason: StopReason::EndTurn },
    ]);

    let mut machine_executor = executor_with(machine, Box::new(transport), tools, RuntimeConfig::default());
    let mut state = ExecutionState::new(RunMode::Interactive, "h");
    state.paths.push(Path::new("p0", "start"));

    let (state, suspension) = machine_executor.advance(state, &|| false).await;
    assert_eq!(suspension, Suspension::ExecutionFinished);
    assert_eq!(state.path("p0").unwrap().status, PathStatus::Completed);
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert_eq!(calls.lock().unwrap()[0]["text"], "hi");
}

/// Calling a `transition_to_<Target>` tool commits the path to that edge
/// directly — the turn never reaches a guard-only `end_turn` at all, and a
/// second outbound edge that would otherwise make termination ambiguous is
/// simply never consulted.
#[tokio::test]
async fn transition_tool_call_commits_the_path_without_waiting_for_end_turn() {
    let mut machine = Machine { title: "branch".into(), annotations: vec![], attributes: vec![], nodes: vec![], edges: vec![] };
    machine.nodes.push(node("start", Some("init")));
    let mut ask = node("ask", Some("task"));
    ask.attributes.push(Attribute { name: "prompt".into(), type_hint: None, value: serde_json::json!("pick a branch") });
    machine.nodes.push(ask);
    machine.nodes.push(node("Left", Some("state")));
    machine.nodes.push(node("Right", Some("state")));
    machine.edges.push(arrow("start", "ask"));
    machine.edges.push(arrow("ask", "Left"));
    machine.edges.push(arrow("ask", "Right"));

    let mut tools = ToolRegistry::new();
    tools.register_transition_family();

    let transport = ScriptedTransport::new(vec![LlmResponsePayload {
        content: vec![ContentBlock::ToolUse { call_id: "c1".into(), tool_name: "transition_to_Left".into(), input: serde_json::json!({"reason": "picked left"}) }],
        stop_reason: StopReason::ToolUse,
    }]);

    let mut machine_executor = executor_with(machine, Box::new(transport), tools, RuntimeConfig::default());
    let mut state = ExecutionState::new(RunMode::Interactive, "h");
    state.paths.push(Path::new("p0", "start"));

    let (state, suspension) = machine_executor.advance(state, &|| false).await;
    assert_eq!(suspension, Suspension::ExecutionFinished);
    let path = state.path("p0").unwrap();
    assert_eq!(path.status, PathStatus::Completed);
    assert_eq!(path.current_node, "Left");
}

/// A guarded fan-out picks exactly the edge whose `when:` clause matches the
/// path's context, leaving the other candidate node untouched.
#[tokio::test]
async fn guarded_fanout_resolves_to_one_branch() {
    let mut machine = Machine { title: "branch".into(), annotations: vec![], attributes: vec![], nodes: vec![], edges: vec![] };
    machine.nodes.push(node("pick", Some("init")));
    machine.nodes.push(node("Fast", Some("state")));
    machine.nodes.push(node("Slow", Some("state")));
    machine.edges.push(Edge {
        source: "pick".into(),
        segments: vec![Segment {
            target: "Fast".into(),
            label: vec![LabelPart::Value { value: vec![LabelValue { name: "guard".into(), value: None, text: Some("when: mode == \"fast\"".into()) }] }],
            end_type: "arrow".into(),
        }],
    });
    machine.edges.push(Edge {
        source: "pick".into(),
        segments: vec![Segment {
            target: "Slow".into(),
            label: vec![LabelPart::Value { value: vec![LabelValue { name: "guard".into(), value: None, text: Some("when: mode == \"slow\"".into()) }] }],
            end_type: "arrow".into(),
        }],
    });

    let mut machine_executor = executor_with(machine, Box::new(ScriptedTransport::new(vec![])), ToolRegistry::new(), RuntimeConfig::default());
    let mut state = ExecutionState::new(RunMode::Interactive, "h");
    let mut path = Path::new("p0", "pick");
    path.context_values.insert("mode".to_string(), serde_json::json!("slow"));
    state.paths.push(path);

    let (state, suspension) = machine_executor.advance(state, &|| false).await;
    assert_eq!(suspension, Suspension::ExecutionFinished);
    assert_eq!(state.path("p0").unwrap().visited, vec!["pick", "Slow"]);
}

/// Two async-spawned paths converge on a merge barrier; the winner carries
/// on past the barrier while the other path is completed as merged.
#[tokio::test]
async fn barrier_merge_completes_siblings_and_advances_the_winner() {
    let mut machine = Machine { title: "fork-join".into(), annotations: vec![], attributes: vec![], nodes: vec![], edges: vec![] };
    machine.nodes.push(node("start", Some("init")));
    machine.nodes.push(node("ForkRoot", Some("state")));
    machine.nodes.push(node("LeftBranch", Some("state")));
    machine.nodes.push(node("RightBranch", Some("state")));
    machine.nodes.push(node("Merged", Some("state")));

    // The forking path's own edge: plain, unconditional, so it moves off
    // `start` for good in the same step it spawns the two async branches —
    // without this, `start` would keep restaging its async edges forever.
    machine.edges.push(arrow("start", "ForkRoot"));
    machine.edges.push(Edge {
        source: "start".into(),
        segments: vec![Segment {
            target: "LeftBranch".into(),
            label: vec![LabelPart::Annotation(Annotation { name: "async".into(), value: None, attributes: Default::default() })],
            end_type: "arrow".into(),
        }],
    });
    machine.edges.push(Edge {
        source: "start".into(),
        segments: vec![Segment {
            target: "RightBranch".into(),
            label: vec![LabelPart::Annotation(Annotation { name: "async".into(), value: None, attributes: Default::default() })],
            end_type: "arrow".into(),
        }],
    });
    machine.edges.push(Edge {
        source: "LeftBranch".into(),
        segments: vec![Segment {
            target: "Merged".into(),
            label: vec![LabelPart::Annotation(Annotation { name: "join".into(), value: Some(serde_json::json!("fanin")), attributes: Default::default() })],
            end_type: "arrow".into(),
        }],
    });
    machine.edges.push(Edge {
        source: "RightBranch".into(),
        segments: vec![Segment {
            target: "Merged".into(),
            label: vec![LabelPart::Annotation(Annotation { name: "join".into(), value: Some(serde_json::json!("fanin")), attributes: Default::default() })],
            end_type: "arrow".into(),
        }],
    });

    let mut machine_executor = executor_with(machine, Box::new(ScriptedTransport::new(vec![])), ToolRegistry::new(), RuntimeConfig::default());
    let mut state = ExecutionState::new(RunMode::Interactive, "h");
    state.paths.push(Path::new("p0", "start"));

    let (state, suspension) = machine_executor.advance(state, &|| false).await;
    assert_eq!(suspension, Suspension::ExecutionFinished);

    let completed: Vec<_> = state.paths.iter().filter(|p| p.status == PathStatus::Completed).collect();
    assert_eq!(completed.len(), 3, "the forking path at ForkRoot, the merge winner at Merged, and one sibling completed as merged");
    assert!(state.paths.iter().any(|p| p.current_node == "Merged" && p.status == PathStatus::Completed));
    assert!(state.paths.iter().any(|p| p.current_node == "ForkRoot" && p.status == PathStatus::Completed));
}

/// `update_definition` rejects a candidate that doesn't validate, leaving
/// the running machine untouched; a sound candidate swaps the snapshot and
/// the shared mirror a `get_machine_definition` tool would read from.
#[tokio::test]
async fn update_definition_rejects_invalid_candidate_but_accepts_a_sound_one() {
    let mut machine = Machine { title: "rewritable".into(), annotations: vec![], attributes: vec![], nodes: vec![], edges: vec![] };
    machine.nodes.push({
        let mut n = node("rewrite", Some("task"));
        n.annotations.push(Annotation { name: "meta".into(), value: None, attributes: Default::default() });
        n.attributes.push(Attribute { name: "prompt".into(), type_hint: None, value: serde_json::json!("rewrite the machine") });
        n
    });
    machine.nodes.push(node("done", Some("state")));
    machine.edges.push(arrow("rewrite", "done"));

    let snapshot = Arc::new(Mutex::new(serde_json::Value::Null));

    let mut invalid_machine = machine.clone();
    invalid_machine.edges.push(arrow("rewrite", "nonexistent_node"));

    let transport = ScriptedTransport::new(vec![
        LlmResponsePayload {
            content: vec![ContentBlock::ToolUse { call_id: "c1".into(), tool_name: "update_definition".into(), input: serde_json::to_value(&invalid_machine).unwrap() }],
            stop_reason: StopReason::ToolUse,
        },
        LlmResponsePayload {
            content: vec![ContentBlock::ToolUse { call_id: "c2".into(), tool_name: "update_definition".into(), input: serde_json::to_value(&machine).unwrap() }],
            stop_reason: StopReason::ToolUse,
        },
        LlmResponsePayload { content: vec![ContentBlock::Text { text: "done rewriting".into() }], stop_reason: StopReason::EndTurn },
    ]);

    let mut tools = ToolRegistry::new();
    tools.register_transition_family();
    tools.register_static(
        ToolDescriptor { name: "update_definition".into(), description: "propose a new definition".into(), input_schema: serde_json::json!({}) },
        Arc::new(UpdateDefinitionTool),
    );

    let runtime = Runtime::new(machine, RuntimeConfig::default());
    let effect_executor = EffectExecutor::new(Box::new(transport), tools);
    let mut machine_executor = MachineExecutor::new(runtime, effect_executor).with_machine_snapshot(snapshot.clone());

    let mut state = ExecutionState::new(RunMode::Interactive, "h");
    state.paths.push(Path::new("p0", "rewrite"));

    let (state, suspension) = machine_executor.advance(state, &|| false).await;
    assert_eq!(suspension, Suspension::ExecutionFinished);
    assert_eq!(state.path("p0").unwrap().status, PathStatus::Completed);

    let stored = snapshot.lock().unwrap().clone();
    let stored_machine: Machine = serde_json::from_value(stored).unwrap();
    assert!(stored_machine.validate().is_ok());
    assert!(stored_machine.find_node("nonexistent_node").is_none());
}

/// A machine whose only edge is guarded off keeps stalling the same path
/// until the step budget trips — `advance` must still return control rather
/// than loop forever.
#[tokio::test]
async fn exhausted_step_budget_suspends_rather_than_looping_forever() {
    let mut machine = Machine { title: "stuck".into(), annotations: vec![], attributes: vec![], nodes: vec![], edges: vec![] };
    machine.nodes.push(node("start", Some("init")));
    machine.nodes.push(node("unreachable_target", Some("state")));
    machine.edges.push(Edge {
        source: "start".into(),
        segments: vec![Segment {
            target: "unreachable_target".into(),
            label: vec![LabelPart::Value { value: vec![LabelValue { name: "guard".into(), value: None, text: Some("when: never == \"true\"".into()) }] }],
            end_type: "arrow".into(),
        }],
    });

    let mut config = RuntimeConfig::default();
    config.max_steps = 5;
    let mut machine_executor = executor_with(machine, Box::new(ScriptedTransport::new(vec![])), ToolRegistry::new(), config);
    let mut state = ExecutionState::new(RunMode::Interactive, "h");
    state.paths.push(Path::new("p0", "start"));

    let (state, suspension) = machine_executor.advance(state, &|| false).await;
    assert_eq!(suspension, Suspension::StepBudgetExceeded);
    assert_eq!(state.metadata.step_count, 5);
    assert_eq!(state.path("p0").unwrap().status, PathStatus::Active);
}

/// `step` mode stops after exactly one unit of work even when more paths
/// remain runnable, and resuming with the same mode drains the rest.
#[tokio::test]
async fn step_mode_yields_control_after_one_step_per_call() {
    let mut machine = Machine { title: "linear".into(), annotations: vec![], attributes: vec![], nodes: vec![], edges: vec![] };
    machine.nodes.push(node("a", Some("init")));
    machine.nodes.push(node("b", Some("state")));
    machine.nodes.push(node("c", Some("state")));
    machine.edges.push(arrow("a", "b"));
    machine.edges.push(arrow("b", "c"));

    let mut machine_executor = executor_with(machine, Box::new(ScriptedTransport::new(vec![])), ToolRegistry::new(), RuntimeConfig::default());
    let mut state = ExecutionState::new(RunMode::Step, "h");
    state.paths.push(Path::new("p0", "a"));

    let (state, suspension) = machine_executor.advance(state, &|| false).await;
    assert_eq!(suspension, Suspension::GranularityReached);
    assert_eq!(state.path("p0").unwrap().current_node, "b");

    let (state, suspension) = machine_executor.advance(state, &|| false).await;
    assert_eq!(suspension, Suspension::GranularityReached);
    assert_eq!(state.path("p0").unwrap().current_node, "c");

    // Stepping the terminal node completes it within that same granularity
    // unit; the loop still yields control rather than peeking ahead.
    let (state, suspension) = machine_executor.advance(state, &|| false).await;
    assert_eq!(suspension, Suspension::GranularityReached);
    assert_eq!(state.path("p0").unwrap().status, PathStatus::Completed);

    // One more call sees an already-complete state up front.
    let (state, suspension) = machine_executor.advance(state, &|| false).await;
    assert_eq!(suspension, Suspension::ExecutionFinished);
    assert_eq!(state.path("p0").unwrap().status, PathStatus::Completed);
}
