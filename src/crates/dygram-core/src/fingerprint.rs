//! Request fingerprinting for recording/playback.
//!
//! A fingerprint is a stable hash over `(model, normalised conversation,
//! sorted tool catalogue, system prompt)`. Two `InvokeLlm` effects with the
//! same fingerprint are, as far as the transport is concerned, the same
//! request — that's the identity `dygram-checkpoint`'s recording directory
//! is keyed by.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::state::Message;

/// Compute the fingerprint for one LLM request.
///
/// Tool names are sorted before hashing so that two catalogues differing
/// only in construction order still fingerprint identically.
pub fn request_fingerprint(model: &str, system_prompt: &str, conversation: &[Message], tools: &[Value]) -> String {
    let mut tool_names: Vec<&str> = tools
        .iter()
        .filter_map(|t| t.get("name").and_then(Value::as_str))
        .collect();
    tool_names.sort_unstable();

    let canonical = serde_json::json!({
        "model": model,
        "system_prompt": system_prompt,
        "conversation": conversation,
        "tools": tool_names,
    });
    let bytes = serde_json::to_vec(&canonical).expect("fingerprint payload always serializes");
    let digest = Sha256::digest(&bytes);
    format!("{digest:x}")
}
