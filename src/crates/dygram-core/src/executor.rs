//! Effect Executor (C6) — the imperative shell. Performs each [`Effect`],
//! producing zero or more [`Observation`]s for [`crate::runtime::Runtime::apply`]
//! to fold back in.
//!
//! The executor owns everything [`crate::runtime::Runtime`] deliberately
//! doesn't: the LLM transport, the tool registry, the virtual filesystem,
//! and (in record/playback mode) the recording reader/writer. None of that
//! state is part of `ExecutionState` — it can't be, since it isn't data.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, warn};

use crate::effect::{ContentBlock, Effect, LogLevel, Observation, StopReason, TimeoutScope};
use crate::retry::RetryPolicy;
use crate::state::Message;
use crate::tool::ToolRegistry;

/// One outgoing request to an LLM, in the shape every transport accepts.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LlmRequest {
    pub model: String,
    pub system_prompt: String,
    pub conversation: Vec<Message>,
    pub tools: Vec<Value>,
}

/// What a transport reports back for one request.
#[derive(Debug, Clone)]
pub struct LlmResponsePayload {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
}

/// The engine's only dependency on an LLM backend. Implementations live in
/// `dygram-llm`; this crate only ever sees this narrow surface.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn invoke_with_tools(&self, request: LlmRequest) -> anyhow::Result<LlmResponsePayload>;
}

/// Three ways the executor can source an `InvokeLlm` response.
pub enum TransportMode {
    Live,
    Record { writer: dygram_checkpoint::RecordingWriter, turn_counter: Mutex<u64> },
    Playback { reader: dygram_checkpoint::RecordingReader, turn_counter: Mutex<u64> },
}

/// A trivial in-process filesystem: path → content, last-writer-wins.
#[derive(Default)]
pub struct VirtualFilesystem {
    files: Mutex<HashMap<String, String>>,
}

impl VirtualFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, path: &str, content: &str) {
        self.files.lock().expect("vfs mutex poisoned").insert(path.to_string(), content.to_string());
    }

    pub fn read(&self, path: &str) -> Option<String> {
        self.files.lock().expect("vfs mutex poisoned").get(path).cloned()
    }
}

pub struct EffectExecutor {
    pub transport: Box<dyn LlmTransport>,
    pub transport_mode: TransportMode,
    pub tools: ToolRegistry,
    pub vfs: Arc<VirtualFilesystem>,
    pub retry_policy: RetryPolicy,
}

impl EffectExecutor {
    pub fn new(transport: Box<dyn LlmTransport>, tools: ToolRegistry) -> Self {
        Self {
            transport,
            transport_mode: TransportMode::Live,
            tools,
            vfs: Arc::new(VirtualFilesystem::new()),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Share a VFS handle with tool handlers registered in `tools` (e.g.
    /// `read_file`/`write_file`) so a `WriteVfs` effect and a tool call see
    /// the same store.
    pub fn with_vfs(mut self, vfs: Arc<VirtualFilesystem>) -> Self {
        self.vfs = vfs;
        self
    }

    pub fn with_record(mut self, writer: dygram_checkpoint::RecordingWriter) -> Self {
        self.transport_mode = TransportMode::Record { writer, turn_counter: Mutex::new(0) };
        self
    }

    pub fn with_playback(mut self, reader: dygram_checkpoint::RecordingReader) -> Self {
        self.transport_mode = TransportMode::Playback { reader, turn_counter: Mutex::new(0) };
        self
    }

    /// Perform one effect, returning the observations it produced. An effect
    /// that requires no feedback (`Log`, `WriteVfs`, `CheckpointRequested`,
    /// the already-applied `UpdateNodeVisit`/`TransitionPath`/...) returns an
    /// empty vec.
    pub async fn execute(&self, effect: &Effect) -> Vec<Observation> {
        match effect {
            Effect::Log { level, message } => {
                log_at(*level, message);
                Vec::new()
            }
            Effect::WriteVfs { path, content } => {
                self.vfs.write(path, content);
                Vec::new()
            }
            Effect::InvokeLlm { path_id, model, system_prompt, conversation, tools, fingerprint } => {
                self.invoke_llm(path_id, model, system_prompt, conversation, tools, fingerprint).await
            }
            Effect::InvokeTool { path_id, call_id, tool_name, input, .. } => {
                vec![self.invoke_tool(path_id, call_id, tool_name, input).await]
            }
            Effect::CheckpointRequested { .. }
            | Effect::UpdateNodeVisit { .. }
            | Effect::TransitionPath { .. }
            | Effect::CompletePath { .. }
            | Effect::FailPath { .. }
            | Effect::SpawnPath { .. } => Vec::new(),
        }
    }

    async fn invoke_llm(
        &self,
        path_id: &str,
        model: &str,
        system_prompt: &str,
        conversation: &[Message],
        tools: &[Value],
        fingerprint: &str,
    ) -> Vec<Observation> {
        match &self.transport_mode {
            TransportMode::Playback { reader, turn_counter } => {
                let turn = next_turn(turn_counter);
                match reader.playback(turn, fingerprint) {
                    Ok(response) => match serde_json::from_value::<LlmResponsePayloadWire>(response) {
                        Ok(payload) => vec![Observation::LlmResponse {
                            path_id: path_id.to_string(),
                            content: payload.content,
                            stop_reason: payload.stop_reason,
                        }],
                        Err(e) => {
                            error!(error = %e, "recorded response did not match expected shape");
                            vec![Observation::LlmResponse {
                                path_id: path_id.to_string(),
                                content: vec![ContentBlock::Text { text: String::new() }],
                                stop_reason: StopReason::Error,
                            }]
                        }
                    },
                    Err(e) => {
                        error!(error = %e, "recording missing for playback turn");
                        vec![Observation::LlmResponse {
                            path_id: path_id.to_string(),
                            content: vec![ContentBlock::Text { text: String::new() }],
                            stop_reason: StopReason::Error,
                        }]
                    }
                }
            }
            _ => {
                let request = LlmRequest {
                    model: model.to_string(),
                    system_prompt: system_prompt.to_string(),
                    conversation: conversation.to_vec(),
                    tools: tools.to_vec(),
                };
                let mut attempt = 0;
                loop {
                    match self.transport.invoke_with_tools(request.clone()).await {
                        Ok(payload) => {
                            if let TransportMode::Record { writer, turn_counter } = &self.transport_mode {
                                let turn = next_turn(turn_counter);
                                let request_json = serde_json::to_value(&request).unwrap_or(Value::Null);
                                let response_json = serde_json::to_value(LlmResponsePayloadWire {
                                    content: payload.content.clone(),
                                    stop_reason: payload.stop_reason,
                                })
                                .unwrap_or(Value::Null);
                                if let Err(e) = writer.record(turn, fingerprint, &request_json, &response_json) {
                                    warn!(error = %e, "failed to persist recorded turn");
                                }
                            }
                            return vec![Observation::LlmResponse {
                                path_id: path_id.to_string(),
                                content: payload.content,
                                stop_reason: payload.stop_reason,
                            }];
                        }
                        Err(e) if self.retry_policy.should_retry(attempt) => {
                            warn!(attempt, error = %e, "LLM transport call failed, retrying");
                            tokio::time::sleep(self.retry_policy.calculate_delay(attempt)).await;
                            attempt += 1;
                        }
                        Err(e) => {
                            error!(error = %e, "LLM transport exhausted retries");
                            return vec![Observation::LlmResponse {
                                path_id: path_id.to_string(),
                                content: vec![ContentBlock::Text { text: e.to_string() }],
                                stop_reason: StopReason::Error,
                            }];
                        }
                    }
                }
            }
        }
    }

    async fn invoke_tool(&self, path_id: &str, call_id: &str, tool_name: &str, input: &Value) -> Observation {
        match self.tools.resolve(tool_name) {
            Some(handler) => {
                let outcome = handler.call(input.clone()).await;
                Observation::ToolResult {
                    path_id: path_id.to_string(),
                    call_id: call_id.to_string(),
                    tool_name: tool_name.to_string(),
                    success: outcome.success,
                    output: outcome.output,
                    error: outcome.error,
                }
            }
            None => Observation::ToolResult {
                path_id: path_id.to_string(),
                call_id: call_id.to_string(),
                tool_name: tool_name.to_string(),
                success: false,
                output: Value::Null,
                error: Some(format!("no tool registered for '{tool_name}'")),
            },
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct LlmResponsePayloadWire {
    content: Vec<ContentBlock>,
    stop_reason: StopReason,
}

fn next_turn(counter: &Mutex<u64>) -> u64 {
    let mut guard = counter.lock().expect("turn counter mutex poisoned");
    let turn = *guard;
    *guard += 1;
    turn
}

fn log_at(level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => tracing::debug!("{message}"),
        LogLevel::Info => tracing::info!("{message}"),
        LogLevel::Warn => tracing::warn!("{message}"),
        LogLevel::Error => tracing::error!("{message}"),
    }
}

/// Cancellation/timeout are injected directly as observations; they don't
/// correspond to an `Effect` the runtime emitted.
pub fn cancel_observation() -> Observation {
    Observation::CancelRequested
}

pub fn timeout_observation(scope: TimeoutScope) -> Observation {
    Observation::Timeout { scope }
}
