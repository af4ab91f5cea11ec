//! The meta-tool family a `@meta`-annotated node exposes: `get_machine_definition`,
//! `update_definition`, `construct_tool`.
//!
//! `update_definition`'s actual validation and snapshot swap happens in
//! `dygram-core`'s turn loop (`MachineExecutor::apply_meta_update`) — this
//! handler's only job is to hand back the candidate definition the caller
//! supplied, shaped as a machine. `get_machine_definition` reads the mirror
//! the turn loop keeps in sync on every successful rebuild.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dygram_core::machine::Machine;
use dygram_core::tool::{ToolHandler, ToolOutcome};
use serde_json::Value;
use tracing::{debug, warn};

/// Returns the machine definition currently driving the run, as JSON.
pub struct GetMachineDefinitionTool {
    snapshot: Arc<Mutex<Value>>,
}

impl GetMachineDefinitionTool {
    pub fn new(snapshot: Arc<Mutex<Value>>) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl ToolHandler for GetMachineDefinitionTool {
    async fn call(&self, _input: Value) -> ToolOutcome {
        ToolOutcome::ok(self.snapshot.lock().expect("machine snapshot mutex poisoned").clone())
    }
}

/// Hands a caller-supplied machine definition through to the turn loop,
/// which is the only place that actually validates and swaps it in.
pub struct UpdateDefinitionTool;

#[async_trait]
impl ToolHandler for UpdateDefinitionTool {
    async fn call(&self, input: Value) -> ToolOutcome {
        match serde_json::from_value::<Machine>(input.clone()) {
            Ok(_) => ToolOutcome::ok(input),
            Err(e) => {
                warn!(error = %e, "update_definition candidate is not shaped like a machine");
                ToolOutcome::err(format!("candidate definition is not shaped like a machine: {e}"))
            }
        }
    }
}

/// Records a requested dynamic tool spec for later wiring.
///
/// A tool registered through this call does not become resolvable this run —
/// `ToolRegistry` is built once, before the turn loop starts, and nothing
/// here has a handle back into it. The spec is recorded so the host
/// embedding this crate can inspect what the model asked for and decide
/// whether to add it to the next run's registry.
pub struct ConstructToolHandler {
    requested: Arc<Mutex<Vec<Value>>>,
}

impl ConstructToolHandler {
    pub fn new() -> Self {
        Self { requested: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn requested_tools(&self) -> Vec<Value> {
        self.requested.lock().expect("requested-tools mutex poisoned").clone()
    }
}

impl Default for ConstructToolHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolHandler for ConstructToolHandler {
    async fn call(&self, input: Value) -> ToolOutcome {
        let Some(name) = input.get("name").and_then(Value::as_str) else {
            return ToolOutcome::err("missing 'name' field on tool construction request");
        };
        self.requested.lock().expect("requested-tools mutex poisoned").push(input.clone());
        debug!(name, "recorded requested tool construction");
        ToolOutcome::ok(serde_json::json!({ "name": name, "status": "recorded" }))
    }
}
