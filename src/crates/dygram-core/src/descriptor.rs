//! State Builder (C4) — derives a cached, immutable descriptor per node from
//! the machine snapshot. [`crate::runtime`] never walks raw machine JSON; it
//! only ever consults a [`NodeDescriptor`].
//!
//! The cache is rebuilt wholesale whenever `update_definition` swaps the
//! snapshot (see [`crate::runtime::Runtime::apply_machine_update`]); there is
//! no incremental update path, because the graphs this engine runs are small
//! enough that rebuilding is cheaper than tracking the delta correctly.

use std::collections::HashMap;

use crate::annotation::{self, AsyncConfig, BarrierConfig};
use crate::machine::{Machine, Segment};
use crate::template::{GuardKind, TemplateContext};

/// One outbound possibility from a node.
#[derive(Debug, Clone)]
pub struct OutboundEdge {
    pub target: String,
    pub guard: Option<(GuardKind, String)>,
    pub barrier: Option<BarrierConfig>,
    pub spawn: Option<AsyncConfig>,
}

impl OutboundEdge {
    fn from_segment(segment: &Segment) -> Self {
        let mut guard = None;
        let mut barrier = None;
        let mut spawn = None;
        for part in &segment.label {
            match part {
                crate::machine::LabelPart::Annotation(a) => {
                    if let Some(cfg) = annotation::process(a) {
                        match cfg {
                            crate::annotation::AnnotationConfig::Barrier(b) => barrier = Some(b),
                            crate::annotation::AnnotationConfig::Async(a) => spawn = Some(a),
                            _ => {}
                        }
                    }
                }
                crate::machine::LabelPart::Value { value } => {
                    for v in value {
                        if let Some(text) = &v.text {
                            if let Some(rest) = text.strip_prefix("when:") {
                                guard = Some((GuardKind::When, rest.trim().to_string()));
                            } else if let Some(rest) = text.strip_prefix("unless:") {
                                guard = Some((GuardKind::Unless, rest.trim().to_string()));
                            }
                        }
                    }
                }
            }
        }
        Self {
            target: segment.target.clone(),
            guard,
            barrier,
            spawn,
        }
    }

    pub fn is_satisfied(&self, ctx: &TemplateContext) -> bool {
        match &self.guard {
            Some((kind, expr)) => crate::template::evaluate_guard(kind.clone(), expr, ctx),
            None => true,
        }
    }
}

/// A cached, read-only view of one node's transition surface and tool exposure.
#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    pub qualified_name: String,
    pub node_type: String,
    pub outbound: Vec<OutboundEdge>,
    pub meta_enabled: bool,
    pub static_tool_names: Vec<String>,
}

impl NodeDescriptor {
    pub fn async_edges(&self) -> impl Iterator<Item = &OutboundEdge> {
        self.outbound.iter().filter(|e| e.spawn.as_ref().map(|a| a.enabled).unwrap_or(false))
    }

    pub fn non_async_edges(&self) -> impl Iterator<Item = &OutboundEdge> {
        self.outbound.iter().filter(|e| !e.spawn.as_ref().map(|a| a.enabled).unwrap_or(false))
    }

    pub fn is_task(&self) -> bool {
        self.node_type == "task"
    }

    pub fn is_terminal(&self) -> bool {
        self.outbound.is_empty()
    }
}

/// Priority order used to infer a node's type when none is declared.
fn infer_type(node: &crate::machine::Node, has_incoming: bool) -> String {
    if let Some(explicit) = &node.node_type {
        return explicit.clone();
    }
    if node.attribute("prompt").is_some() {
        return "task".to_string();
    }
    if node.attribute("inputSchema").is_some() {
        return "tool".to_string();
    }
    if node.name.starts_with("ctx") || node.name.starts_with("context") {
        return "context".to_string();
    }
    if !has_incoming {
        return "init".to_string();
    }
    "state".to_string()
}

/// Build descriptors for every node in `machine`, keyed by qualified name.
pub fn build(machine: &Machine) -> HashMap<String, NodeDescriptor> {
    let mut incoming: std::collections::HashSet<&str> = std::collections::HashSet::new();
    for edge in &machine.edges {
        for segment in &edge.segments {
            incoming.insert(segment.target.as_str());
        }
    }

    let mut descriptors = HashMap::new();
    for (qualified_name, node) in machine.iter_nodes() {
        let meta_enabled = annotation::meta_of(&node.annotations).map(|m| m.enabled).unwrap_or(false)
            || annotation::meta_of(&machine.annotations).map(|m| m.enabled).unwrap_or(false);

        let mut outbound = Vec::new();
        for edge in machine.edges.iter().filter(|e| e.source == qualified_name) {
            for segment in &edge.segments {
                outbound.push(OutboundEdge::from_segment(segment));
            }
        }

        let static_tool_names = node
            .attributes
            .iter()
            .filter(|a| a.name == "tools")
            .filter_map(|a| a.value.as_array())
            .flatten()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();

        descriptors.insert(
            qualified_name.clone(),
            NodeDescriptor {
                qualified_name: qualified_name.clone(),
                node_type: infer_type(node, incoming.contains(qualified_name.as_str())),
                outbound,
                meta_enabled,
                static_tool_names,
            },
        );
    }
    descriptors
}
