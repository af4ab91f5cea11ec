//! Integration coverage for the tool registry and effect executor surface:
//! static/dynamic resolution precedence, VFS sharing between a `WriteVfs`
//! effect and a tool handler, recoverable tool failure, and a record/replay
//! round trip of an LLM turn through `dygram-checkpoint`.
//!
//! These sit below `integration_tests.rs`'s machine-level scenarios — they
//! exercise `ToolRegistry`/`EffectExecutor` directly rather than driving a
//! full `MachineExecutor::advance` loop.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dygram_checkpoint::{RecordingReader, RecordingWriter};
use dygram_core::effect::{ContentBlock, Effect, Observation, StopReason};
use dygram_core::executor::{EffectExecutor, LlmRequest, LlmResponsePayload, LlmTransport, VirtualFilesystem};
use dygram_core::tool::{ToolDescriptor, ToolHandler, ToolOutcome, ToolRegistry};
use serde_json::Value;

struct EchoTransport;

#[async_trait]
impl LlmTransport for EchoTransport {
    async fn invoke_with_tools(&self, _request: LlmRequest) -> anyhow::Result<LlmResponsePayload> {
        Ok(LlmResponsePayload { content: vec![ContentBlock::Text { text: "ok".into() }], stop_reason: StopReason::EndTurn })
    }
}

/// Always reports a recoverable failure, regardless of input — stands in for
/// a tool whose backing operation failed (a bad lookup, an external call that
/// 404'd) without crashing the executor.
struct AlwaysFailingTool;

#[async_trait]
impl ToolHandler for AlwaysFailingTool {
    async fn call(&self, _input: Value) -> ToolOutcome {
        ToolOutcome::err("backing operation unavailable")
    }
}

struct TaggedTool {
    tag: &'static str,
}

#[async_trait]
impl ToolHandler for TaggedTool {
    async fn call(&self, _input: Value) -> ToolOutcome {
        ToolOutcome::ok(serde_json::json!({"via": self.tag}))
    }
}

#[tokio::test]
async fn static_registration_shadows_a_matching_dynamic_family() {
    let mut registry = ToolRegistry::new();
    registry.register_dynamic(
        |name| name.starts_with("transition_to_"),
        |_name| Some(Arc::new(TaggedTool { tag: "dynamic" }) as Arc<dyn ToolHandler>),
    );
    registry.register_static(
        ToolDescriptor {
            name: "transition_to_done".into(),
            description: "explicit override".into(),
            input_schema: serde_json::json!({}),
        },
        Arc::new(TaggedTool { tag: "static" }),
    );

    let handler = registry.resolve("transition_to_done").expect("should resolve");
    let outcome = handler.call(Value::Null).await;
    assert_eq!(outcome.output["via"], "static");

    // A name the static table doesn't know about still falls through to the family.
    let dynamic_only = registry.resolve("transition_to_elsewhere").expect("family should still cover other names");
    let outcome = dynamic_only.call(Value::Null).await;
    assert_eq!(outcome.output["via"], "dynamic");
}

#[tokio::test]
async fn dynamic_families_are_tried_in_registration_order() {
    let mut registry = ToolRegistry::new();
    registry.register_dynamic(|name| name.starts_with("a_"), |_| None);
    registry.register_dynamic(|name| name.starts_with("a_"), |_| Some(Arc::new(TaggedTool { tag: "second" }) as Arc<dyn ToolHandler>));

    let handler = registry.resolve("a_thing").expect("second family should pick it up after the first declines");
    let outcome = handler.call(Value::Null).await;
    assert_eq!(outcome.output["via"], "second");
}

#[tokio::test]
async fn invoke_tool_effect_reports_recoverable_failure_without_panicking() {
    let mut tools = ToolRegistry::new();
    tools.register_static(
        ToolDescriptor { name: "flaky".into(), description: "fails".into(), input_schema: serde_json::json!({}) },
        Arc::new(AlwaysFailingTool),
    );
    let executor = EffectExecutor::new(Box::new(EchoTransport), tools);

    let effect = Effect::InvokeTool {
        path_id: "p0".into(),
        call_id: "c0".into(),
        tool_name: "flaky".into(),
        input: Value::Null,
        fingerprint: "fp".into(),
    };
    let observations = executor.execute(&effect).await;
    assert_eq!(observations.len(), 1);
    match &observations[0] {
        Observation::ToolResult { success, error, .. } => {
            assert!(!success);
            assert_eq!(error.as_deref(), Some("backing operation unavailable"));
        }
        other => panic!("expected a ToolResult, got {other:?}"),
    }
}

#[tokio::test]
async fn unregistered_tool_name_reports_recoverable_failure_with_the_name_in_the_message() {
    let executor = EffectExecutor::new(Box::new(EchoTransport), ToolRegistry::new());
    let effect = Effect::InvokeTool {
        path_id: "p0".into(),
        call_id: "c0".into(),
        tool_name: "nope".into(),
        input: Value::Null,
        fingerprint: "fp".into(),
    };
    let observations = executor.execute(&effect).await;
    match &observations[0] {
        Observation::ToolResult { success, error, .. } => {
            assert!(!success);
            assert!(error.as_deref().unwrap().contains("nope"));
        }
        other => panic!("expected a ToolResult, got {other:?}"),
    }
}

#[tokio::test]
async fn write_vfs_effect_and_a_shared_tool_handler_see_the_same_store() {
    struct ReadBackTool {
        vfs: Arc<VirtualFilesystem>,
    }

    #[async_trait]
    impl ToolHandler for ReadBackTool {
        async fn call(&self, input: Value) -> ToolOutcome {
            let path = input["path"].as_str().unwrap_or_default();
            match self.vfs.read(path) {
                Some(content) => ToolOutcome::ok(serde_json::json!({ "content": content })),
                None => ToolOutcome::err("not found"),
            }
        }
    }

    let vfs = Arc::new(VirtualFilesystem::new());
    let mut tools = ToolRegistry::new();
    tools.register_static(
        ToolDescriptor { name: "read_back".into(), description: "reads a vfs path".into(), input_schema: serde_json::json!({}) },
        Arc::new(ReadBackTool { vfs: vfs.clone() }),
    );
    let executor = EffectExecutor::new(Box::new(EchoTransport), tools).with_vfs(vfs);

    let write = Effect::WriteVfs { path: "notes/a.txt".into(), content: "hello from a node".into() };
    assert!(executor.execute(&write).await.is_empty());

    let call = Effect::InvokeTool {
        path_id: "p0".into(),
        call_id: "c0".into(),
        tool_name: "read_back".into(),
        input: serde_json::json!({"path": "notes/a.txt"}),
        fingerprint: "fp".into(),
    };
    let observations = executor.execute(&call).await;
    match &observations[0] {
        Observation::ToolResult { success, output, .. } => {
            assert!(success);
            assert_eq!(output["content"], "hello from a node");
        }
        other => panic!("expected a ToolResult, got {other:?}"),
    }
}

/// A transport whose single canned response would panic if consulted twice —
/// guards against the record path somehow invoking the live transport more
/// than once for one effect.
struct OnceTransport {
    response: Mutex<Option<LlmResponsePayload>>,
}

#[async_trait]
impl LlmTransport for OnceTransport {
    async fn invoke_with_tools(&self, _request: LlmRequest) -> anyhow::Result<LlmResponsePayload> {
        self.response.lock().unwrap().take().ok_or_else(|| anyhow::anyhow!("called more than once"))
    }
}

#[tokio::test]
async fn recorded_turn_plays_back_identically_on_a_fresh_executor() {
    let dir = std::env::temp_dir().join(format!("dygram-tool-exec-test-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);

    let fingerprint = "fp-fixed";
    let effect = Effect::InvokeLlm {
        path_id: "p0".into(),
        model: "claude-test".into(),
        system_prompt: "be terse".into(),
        conversation: vec![],
        tools: vec![],
        fingerprint: fingerprint.into(),
    };

    let recording_transport = OnceTransport {
        response: Mutex::new(Some(LlmResponsePayload {
            content: vec![ContentBlock::Text { text: "recorded answer".into() }],
            stop_reason: StopReason::EndTurn,
        })),
    };
    let recorder =
        EffectExecutor::new(Box::new(recording_transport), ToolRegistry::new()).with_record(RecordingWriter::new(&dir));
    let recorded = recorder.execute(&effect).await;
    assert_eq!(recorded.len(), 1);

    // A fresh executor backed by a transport that must never be called —
    // playback should satisfy the turn entirely from the recording.
    struct PanicTransport;
    #[async_trait]
    impl LlmTransport for PanicTransport {
        async fn invoke_with_tools(&self, _request: LlmRequest) -> anyhow::Result<LlmResponsePayload> {
            panic!("playback must not reach the live transport");
        }
    }
    let player = EffectExecutor::new(Box::new(PanicTransport), ToolRegistry::new()).with_playback(RecordingReader::new(&dir));
    let played = player.execute(&effect).await;

    match (&recorded[0], &played[0]) {
        (
            Observation::LlmResponse { content: rc, stop_reason: rs, .. },
            Observation::LlmResponse { content: pc, stop_reason: ps, .. },
        ) => {
            assert_eq!(rc, pc);
            assert_eq!(rs, ps);
        }
        other => panic!("expected matching LlmResponse observations, got {other:?}"),
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn playback_reports_an_error_stop_reason_when_the_fingerprint_does_not_match() {
    let dir = std::env::temp_dir().join(format!("dygram-tool-exec-test-mismatch-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);

    let writer = RecordingWriter::new(&dir);
    writer
        .record(0, "fp-original", &serde_json::json!({"model": "m"}), &serde_json::json!({"content": [], "stop_reason": "end_turn"}))
        .expect("recording a fixture turn should succeed");

    struct UnreachableTransport;
    #[async_trait]
    impl LlmTransport for UnreachableTransport {
        async fn invoke_with_tools(&self, _request: LlmRequest) -> anyhow::Result<LlmResponsePayload> {
            panic!("playback must not fall through to the live transport");
        }
    }
    let player = EffectExecutor::new(Box::new(UnreachableTransport), ToolRegistry::new()).with_playback(RecordingReader::new(&dir));

    let effect = Effect::InvokeLlm {
        path_id: "p0".into(),
        model: "m".into(),
        system_prompt: "sys".into(),
        conversation: vec![],
        tools: vec![],
        fingerprint: "fp-different".into(),
    };
    let observations = player.execute(&effect).await;
    match &observations[0] {
        Observation::LlmResponse { stop_reason, .. } => assert_eq!(*stop_reason, StopReason::Error),
        other => panic!("expected an LlmResponse observation, got {other:?}"),
    }

    let _ = std::fs::remove_dir_all(&dir);
}
