//! Visualization Snapshot (C9) — a pure projection of [`ExecutionState`] into
//! a diagram-friendly summary. Never mutates state; safe to call at any time,
//! including mid-turn, from another component or an external inspector.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  ExecutionState                                             │
//! │  • paths, barriers, metadata                                │
//! └─────────────┬──────────────────────────────────────────────┘
//!               │ project(state)
//!               ↓
//! ┌────────────────────────────────────────────────────────────┐
//! │  Snapshot                                                    │
//! │  • activePaths, allPaths                                     │
//! │  • nodeStates[name] = { visitCount, isActive }               │
//! │  • availableTransitions                                      │
//! └─────────────┬──────────────────────────────────────────────┘
//!               │ render(format)
//!               ↓
//! │  Dot | Mermaid | Ascii
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::descriptor::NodeDescriptor;
use crate::state::{ExecutionState, PathStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub visit_count: usize,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSummary {
    pub id: String,
    pub status: String,
    pub current_node: String,
    pub step_count: usize,
}

/// Pure projection of an execution, suitable for rendering or JSON export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub active_paths: Vec<PathSummary>,
    pub all_paths: Vec<PathSummary>,
    pub node_states: HashMap<String, NodeState>,
    pub available_transitions: HashMap<String, Vec<String>>,
}

/// Project `state` into a [`Snapshot`]. `descriptors` supplies each active
/// path's outbound edges for `available_transitions`; pass an empty map if
/// that detail isn't needed.
pub fn project(state: &ExecutionState, descriptors: &HashMap<String, NodeDescriptor>) -> Snapshot {
    let mut node_states: HashMap<String, NodeState> = HashMap::new();
    for path in &state.paths {
        for node in &path.visited {
            let entry = node_states.entry(node.clone()).or_insert(NodeState { visit_count: 0, is_active: false });
            entry.visit_count += 1;
        }
        if !path.is_terminal() {
            node_states.entry(path.current_node.clone()).or_insert(NodeState { visit_count: 0, is_active: false }).is_active = true;
        }
    }

    let to_summary = |p: &crate::state::Path| PathSummary {
        id: p.id.clone(),
        status: format!("{:?}", p.status),
        current_node: p.current_node.clone(),
        step_count: p.visited.len(),
    };

    let all_paths: Vec<PathSummary> = state.paths.iter().map(to_summary).collect();
    let active_paths: Vec<PathSummary> = state.paths.iter().filter(|p| !p.is_terminal()).map(to_summary).collect();

    let mut available_transitions = HashMap::new();
    for path in state.paths.iter().filter(|p| p.status == PathStatus::Active) {
        if let Some(descriptor) = descriptors.get(&path.current_node) {
            let targets: Vec<String> = descriptor.outbound.iter().map(|e| e.target.clone()).collect();
            available_transitions.insert(path.id.clone(), targets);
        }
    }

    Snapshot { active_paths, all_paths, node_states, available_transitions }
}

/// Output format selectable from the CLI's `exec show --format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizationFormat {
    Text,
    Json,
    Dot,
    Mermaid,
    Ascii,
}

impl std::str::FromStr for VisualizationFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "dot" => Ok(Self::Dot),
            "mermaid" => Ok(Self::Mermaid),
            "ascii" => Ok(Self::Ascii),
            other => Err(format!("unknown visualization format '{other}'")),
        }
    }
}

/// Render `snapshot` in `format`. Falls back gracefully — every format
/// handles an empty snapshot without panicking.
pub fn render(snapshot: &Snapshot, format: VisualizationFormat) -> String {
    match format {
        VisualizationFormat::Text => render_text(snapshot),
        VisualizationFormat::Json => serde_json::to_string_pretty(snapshot).unwrap_or_default(),
        VisualizationFormat::Dot => render_dot(snapshot),
        VisualizationFormat::Mermaid => render_mermaid(snapshot),
        VisualizationFormat::Ascii => render_ascii(snapshot),
    }
}

fn render_text(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    for path in &snapshot.all_paths {
        out.push_str(&format!("{}: {} @ {} ({} steps)\n", path.id, path.status, path.current_node, path.step_count));
    }
    out
}

fn render_dot(snapshot: &Snapshot) -> String {
    let mut out = String::from("digraph execution {\n");
    for (node, state) in &snapshot.node_states {
        let style = if state.is_active { "style=filled,fillcolor=lightblue" } else { "style=solid" };
        out.push_str(&format!("  \"{node}\" [label=\"{node}\\nvisits={}\", {style}];\n", state.visit_count));
    }
    for (path_id, targets) in &snapshot.available_transitions {
        for target in targets {
            out.push_str(&format!("  \"{path_id}\" -> \"{target}\" [style=dashed];\n"));
        }
    }
    out.push_str("}\n");
    out
}

fn render_mermaid(snapshot: &Snapshot) -> String {
    let mut out = String::from("graph TD\n");
    for (node, state) in &snapshot.node_states {
        let marker = if state.is_active { "((active))" } else { "" };
        out.push_str(&format!("  {node}{marker}[\"{node} x{}\"]\n", state.visit_count));
    }
    out
}

fn render_ascii(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    for path in &snapshot.active_paths {
        out.push_str(&format!("* {} -> {}\n", path.id, path.current_node));
    }
    if snapshot.active_paths.is_empty() {
        out.push_str("(no active paths)\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Path, RunMode};

    #[test]
    fn project_counts_visits_and_marks_active_node() {
        let mut state = ExecutionState::new(RunMode::Step, "h");
        let mut path = Path::new("p0", "A");
        path.move_to("B");
        path.move_to("A");
        state.paths.push(path);

        let snapshot = project(&state, &HashMap::new());
        assert_eq!(snapshot.node_states["A"].visit_count, 2);
        assert!(snapshot.node_states["A"].is_active);
        assert!(!snapshot.node_states["B"].is_active);
    }

    #[test]
    fn completed_path_is_excluded_from_active_paths() {
        let mut state = ExecutionState::new(RunMode::Step, "h");
        let mut path = Path::new("p0", "A");
        path.complete();
        state.paths.push(path);

        let snapshot = project(&state, &HashMap::new());
        assert!(snapshot.active_paths.is_empty());
        assert_eq!(snapshot.all_paths.len(), 1);
    }

    #[test]
    fn every_format_handles_empty_snapshot() {
        let snapshot = Snapshot { active_paths: vec![], all_paths: vec![], node_states: HashMap::new(), available_transitions: HashMap::new() };
        for format in [VisualizationFormat::Text, VisualizationFormat::Json, VisualizationFormat::Dot, VisualizationFormat::Mermaid, VisualizationFormat::Ascii] {
            let rendered = render(&snapshot, format);
            assert!(!rendered.is_empty() || format == VisualizationFormat::Mermaid);
        }
    }

    #[test]
    fn format_parses_from_cli_string() {
        assert_eq!("dot".parse::<VisualizationFormat>().unwrap(), VisualizationFormat::Dot);
        assert!("bogus".parse::<VisualizationFormat>().is_err());
    }
}
