//! In-process mock transport — the one the engine ships so tests and CI
//! never need network access or an API key.

use std::sync::Mutex;

use async_trait::async_trait;
use dygram_core::executor::{LlmRequest, LlmResponsePayload, LlmTransport};

use crate::error::TransportError;

/// Replays a fixed script of responses in order, one per call. Exhausting
/// the script is a hard error — a test that calls the transport more times
/// than it scripted for has a bug, not a transport failure to paper over.
pub struct ScriptedTransport {
    responses: Mutex<std::collections::VecDeque<LlmResponsePayload>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: impl IntoIterator<Item = LlmResponsePayload>) -> Self {
        Self { responses: Mutex::new(responses.into_iter().collect()), requests: Mutex::new(Vec::new()) }
    }

    /// Every request this transport has seen so far, in order — useful for
    /// asserting on the prompt/tool catalogue a test drove through.
    pub fn requests_seen(&self) -> Vec<LlmRequest> {
        self.requests.lock().expect("requests mutex poisoned").clone()
    }
}

#[async_trait]
impl LlmTransport for ScriptedTransport {
    async fn invoke_with_tools(&self, request: LlmRequest) -> anyhow::Result<LlmResponsePayload> {
        self.requests.lock().expect("requests mutex poisoned").push(request);
        let mut responses = self.responses.lock().expect("responses mutex poisoned");
        responses.pop_front().ok_or_else(|| TransportError::Provider("scripted transport exhausted".to_string()).into())
    }
}
