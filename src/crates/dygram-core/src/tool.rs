//! Tool Registry (C3) — resolves a tool name to a handler and serves the
//! subset of tools valid at a given node.
//!
//! Two registration modes coexist:
//! - **static**: registered once at construction (VFS tools, transport-level tools).
//! - **dynamic**: name *patterns* (`transition_to_*`) matched at resolution time,
//!   since the set of valid transition targets depends on the node being asked.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │  Task node turn                                      │
//! │  • descriptor.static_tool_names + transition_to_*     │
//! │  • + meta family if @meta                             │
//! └──────────────────┬────────────────────────────────────┘
//!                    │ toolsExposed(descriptor, state)
//!                    ↓
//! ┌─────────────────────────────────────────────────────┐
//! │  ToolRegistry::resolve(name) → Option<&dyn ToolHandler>│
//! └─────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Outcome of a single tool invocation, handed back to the effect executor
/// as an `Observation::ToolResult`.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(output: Value) -> Self {
        Self { success: true, output, error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { success: false, output: Value::Null, error: Some(message.into()) }
    }
}

/// A single tool's executable behaviour. Handlers never panic on bad input —
/// a malformed input produces a `ToolOutcome::err`, which the LLM sees as a
/// recoverable `tool_result { success: false }`.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, input: Value) -> ToolOutcome;
}

/// Static tool metadata, independent of any particular node.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

/// A name-pattern tool family resolved lazily (e.g. `transition_to_*`).
type DynamicResolver = Arc<dyn Fn(&str) -> Option<Arc<dyn ToolHandler>> + Send + Sync>;

struct DynamicFamily {
    matches: Arc<dyn Fn(&str) -> bool + Send + Sync>,
    resolver: DynamicResolver,
}

/// Catalogue of statically-registered tools plus dynamic name-pattern families.
#[derive(Default)]
pub struct ToolRegistry {
    static_tools: HashMap<String, RegisteredTool>,
    dynamic_families: Vec<DynamicFamily>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_static(&mut self, descriptor: ToolDescriptor, handler: Arc<dyn ToolHandler>) {
        self.static_tools.insert(descriptor.name.clone(), RegisteredTool { descriptor, handler });
    }

    /// Register a dynamic family: `matches` decides whether a name belongs to
    /// this family, `resolver` builds the handler for a matched name.
    pub fn register_dynamic(
        &mut self,
        matches: impl Fn(&str) -> bool + Send + Sync + 'static,
        resolver: impl Fn(&str) -> Option<Arc<dyn ToolHandler>> + Send + Sync + 'static,
    ) {
        self.dynamic_families.push(DynamicFamily { matches: Arc::new(matches), resolver: Arc::new(resolver) });
    }

    /// Resolve `name` to a handler, checking static tools first, then each
    /// dynamic family in registration order.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        if let Some(tool) = self.static_tools.get(name) {
            return Some(tool.handler.clone());
        }
        for family in &self.dynamic_families {
            if (family.matches)(name) {
                if let Some(handler) = (family.resolver)(name) {
                    return Some(handler);
                }
            }
        }
        None
    }

    pub fn static_descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.static_tools.get(name).map(|t| &t.descriptor)
    }

    /// Helper constructor for a `transition_to_<Target>` family, backed by a
    /// per-target no-op handler — the actual transition is carried out by
    /// the runtime when it sees which tool was called, not by the handler.
    pub fn register_transition_family(&mut self) {
        self.register_dynamic(
            |name| name.starts_with("transition_to_"),
            |name| {
                let name = name.to_string();
                Some(Arc::new(TransitionToolHandler { name }) as Arc<dyn ToolHandler>)
            },
        );
    }
}

/// A synthetic tool standing in for a transition choice. Calling it reports
/// success with the chosen target so the turn loop can commit the edge; it
/// performs no other side effect.
struct TransitionToolHandler {
    name: String,
}

#[async_trait]
impl ToolHandler for TransitionToolHandler {
    async fn call(&self, input: Value) -> ToolOutcome {
        let target = self.name.strip_prefix("transition_to_").unwrap_or(&self.name);
        ToolOutcome::ok(serde_json::json!({ "target": target, "reason": input.get("reason") }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        async fn call(&self, input: Value) -> ToolOutcome {
            ToolOutcome::ok(input)
        }
    }

    #[tokio::test]
    async fn static_tool_resolves_and_executes() {
        let mut registry = ToolRegistry::new();
        registry.register_static(
            ToolDescriptor { name: "echo".into(), description: "echoes input".into(), input_schema: serde_json::json!({}) },
            Arc::new(EchoTool),
        );
        let handler = registry.resolve("echo").expect("echo should resolve");
        let outcome = handler.call(serde_json::json!({"x": 1})).await;
        assert!(outcome.success);
        assert_eq!(outcome.output, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn transition_family_resolves_any_matching_name() {
        let mut registry = ToolRegistry::new();
        registry.register_transition_family();
        let handler = registry.resolve("transition_to_Fast").expect("should resolve via dynamic family");
        let outcome = handler.call(serde_json::json!({"reason": "picked fast path"})).await;
        assert_eq!(outcome.output["target"], "Fast");
    }

    #[test]
    fn unregistered_name_does_not_resolve() {
        let registry = ToolRegistry::new();
        assert!(registry.resolve("nonexistent").is_none());
    }
}
