//! HTTP-backed [`LlmTransport`] talking to the Anthropic Messages API.
//!
//! This is the one live transport the engine ships with — "a thin
//! HTTP-backed transport so the crate is runnable end-to-end", not a
//! provider-abstraction layer. Swapping vendors means writing another
//! `LlmTransport` impl next to this one, not branching inside it.

use async_trait::async_trait;
use dygram_core::effect::{ContentBlock, StopReason};
use dygram_core::executor::{LlmRequest, LlmResponsePayload, LlmTransport};
use dygram_core::state::Message;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::AnthropicConfig;
use crate::error::TransportError;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: usize = 4096;

pub struct ClaudeTransport {
    config: AnthropicConfig,
    client: Client,
}

impl ClaudeTransport {
    pub fn new(config: AnthropicConfig) -> Self {
        let client = Client::builder().timeout(config.timeout).build().expect("failed to build HTTP client");
        Self { config, client }
    }
}

#[async_trait]
impl LlmTransport for ClaudeTransport {
    async fn invoke_with_tools(&self, request: LlmRequest) -> anyhow::Result<LlmResponsePayload> {
        let url = format!("{}/v1/messages", self.config.base_url);
        let body = AnthropicRequest {
            model: if request.model.is_empty() { self.config.model.clone() } else { request.model },
            system: if request.system_prompt.is_empty() { None } else { Some(request.system_prompt) },
            messages: request.conversation.iter().map(to_anthropic_message).collect(),
            tools: request.tools.iter().map(to_anthropic_tool).collect(),
            max_tokens: DEFAULT_MAX_TOKENS,
        };

        debug!(model = %body.model, message_count = body.messages.len(), "sending request to Anthropic");
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(TransportError::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "Anthropic API returned an error response");
            return Err(if status.as_u16() == 401 {
                TransportError::Authentication(text)
            } else if status.as_u16() == 429 {
                TransportError::RateLimitExceeded(text)
            } else {
                TransportError::Provider(format!("Anthropic API error {status}: {text}"))
            }
            .into());
        }

        let parsed: AnthropicResponse = response.json().await.map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        debug!(stop_reason = ?parsed.stop_reason, "received response from Anthropic");
        Ok(from_anthropic_response(parsed))
    }
}

fn to_anthropic_message(message: &Message) -> AnthropicMessage {
    match message.role.as_str() {
        "assistant" => {
            let blocks: Vec<ContentBlock> = serde_json::from_value(message.content.clone()).unwrap_or_default();
            AnthropicMessage { role: "assistant".to_string(), content: blocks.iter().map(content_block_out).collect() }
        }
        "tool" => {
            let call_id = message.content.get("call_id").and_then(Value::as_str).unwrap_or_default();
            let success = message.content.get("success").and_then(Value::as_bool).unwrap_or(true);
            let content = message.content.get("content").cloned().unwrap_or(Value::Null);
            AnthropicMessage {
                role: "user".to_string(),
                content: vec![serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": call_id,
                    "is_error": !success,
                    "content": content.as_str().map(str::to_string).unwrap_or_else(|| content.to_string()),
                })],
            }
        }
        _ => {
            let text = message.content.as_str().map(str::to_string).unwrap_or_else(|| message.content.to_string());
            AnthropicMessage { role: "user".to_string(), content: vec![serde_json::json!({"type": "text", "text": text})] }
        }
    }
}

fn content_block_out(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => serde_json::json!({"type": "text", "text": text}),
        ContentBlock::ToolUse { call_id, tool_name, input } => {
            serde_json::json!({"type": "tool_use", "id": call_id, "name": tool_name, "input": input})
        }
    }
}

fn to_anthropic_tool(tool: &Value) -> Value {
    let name = tool.get("name").and_then(Value::as_str).unwrap_or("unnamed_tool");
    let description = tool.get("description").and_then(Value::as_str).unwrap_or("");
    let input_schema = tool
        .get("input_schema")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}, "additionalProperties": true}));
    serde_json::json!({"name": name, "description": description, "input_schema": input_schema})
}

fn from_anthropic_response(response: AnthropicResponse) -> LlmResponsePayload {
    let content = response
        .content
        .into_iter()
        .map(|block| match block.block_type.as_str() {
            "tool_use" => ContentBlock::ToolUse {
                call_id: block.id.unwrap_or_default(),
                tool_name: block.name.unwrap_or_default(),
                input: block.input.unwrap_or(Value::Null),
            },
            _ => ContentBlock::Text { text: block.text.unwrap_or_default() },
        })
        .collect();

    let stop_reason = match response.stop_reason.as_deref() {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    };

    LlmResponsePayload { content, stop_reason }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    tools: Vec<Value>,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
    id: Option<String>,
    name: Option<String>,
    input: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_becomes_text_block() {
        let message = Message { role: "user".to_string(), content: serde_json::json!("hello") };
        let converted = to_anthropic_message(&message);
        assert_eq!(converted.role, "user");
        assert_eq!(converted.content[0]["text"], "hello");
    }

    #[test]
    fn tool_message_becomes_tool_result_block() {
        let message = Message {
            role: "tool".to_string(),
            content: serde_json::json!({"call_id": "c1", "success": false, "content": "boom"}),
        };
        let converted = to_anthropic_message(&message);
        assert_eq!(converted.content[0]["type"], "tool_result");
        assert_eq!(converted.content[0]["tool_use_id"], "c1");
        assert_eq!(converted.content[0]["is_error"], true);
    }

    #[test]
    fn response_with_tool_use_parses_stop_reason() {
        let response = AnthropicResponse {
            content: vec![AnthropicContentBlock {
                block_type: "tool_use".to_string(),
                text: None,
                id: Some("call_1".to_string()),
                name: Some("transition_to_Done".to_string()),
                input: Some(serde_json::json!({})),
            }],
            stop_reason: Some("tool_use".to_string()),
        };
        let payload = from_anthropic_response(response);
        assert_eq!(payload.stop_reason, StopReason::ToolUse);
        assert!(matches!(&payload.content[0], ContentBlock::ToolUse { tool_name, .. } if tool_name == "transition_to_Done"));
    }
}
