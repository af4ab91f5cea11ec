//! The Machine JSON data model — the bit-exact shape the engine consumes.
//!
//! This is deliberately a thin, serde-derived mirror of the schema; the grammar,
//! parser, and static validator that produce it live elsewhere. The core assumes
//! the structural invariants already hold (unique name resolution, exactly one
//! logical start) and does not re-validate them except where `update_definition`
//! submits a fresh snapshot at run time — see [`Machine::validate`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Scalar attribute/annotation values. Machine JSON never nests further than this.
pub type Scalar = Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    #[serde(default)]
    pub value: Option<Scalar>,
    #[serde(default)]
    pub attributes: HashMap<String, Scalar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type", default)]
    pub type_hint: Option<String>,
    pub value: Scalar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(rename = "type", default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl Node {
    pub fn attribute(&self, name: &str) -> Option<&Scalar> {
        self.attributes.iter().find(|a| a.name == name).map(|a| &a.value)
    }

    pub fn annotation(&self, name: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.name == name)
    }
}

/// A label part is either a free-form text/value pair or an annotation (e.g. `@barrier(id)`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelPart {
    Value {
        value: Vec<LabelValue>,
    },
    Annotation(Annotation),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelValue {
    pub name: String,
    #[serde(default)]
    pub value: Option<Scalar>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub target: String,
    #[serde(default)]
    pub label: Vec<LabelPart>,
    #[serde(rename = "endType")]
    pub end_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub title: String,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Machine {
    /// Deterministic content hash, used for machine-drift detection on resume.
    ///
    /// Hashes the canonical JSON serialization; two machines that are
    /// structurally equal but were constructed differently hash identically
    /// because `serde_json` serializes struct fields in declaration order.
    pub fn content_hash(&self) -> String {
        let bytes = serde_json::to_vec(self).expect("Machine always serializes");
        let digest = Sha256::digest(&bytes);
        format!("{digest:x}")
    }

    /// Depth-first iterator over every node, fully-qualified by dotted scope.
    pub fn iter_nodes(&self) -> impl Iterator<Item = (String, &Node)> {
        let mut out = Vec::new();
        for node in &self.nodes {
            collect_nodes(node, &node.name, &mut out);
        }
        out.into_iter()
    }

    pub fn find_node(&self, qualified_name: &str) -> Option<&Node> {
        self.iter_nodes().find(|(name, _)| name == qualified_name).map(|(_, n)| n)
    }

    pub fn machine_annotation(&self, name: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.name == name)
    }

    pub fn machine_attribute(&self, name: &str) -> Option<&Scalar> {
        self.attributes.iter().find(|a| a.name == name).map(|a| &a.value)
    }

    /// Shape and invariant check, run whenever `update_definition` submits a
    /// new snapshot. Returns the first violation found; does not attempt to
    /// enumerate all of them.
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("machine has no nodes".to_string());
        }
        let names: std::collections::HashSet<String> = self.iter_nodes().map(|(n, _)| n).collect();
        for edge in &self.edges {
            if !names.contains(&edge.source) {
                return Err(format!("edge source '{}' does not resolve to any node", edge.source));
            }
            for segment in &edge.segments {
                if !names.contains(&segment.target) {
                    return Err(format!(
                        "edge target '{}' (from '{}') does not resolve to any node",
                        segment.target, edge.source
                    ));
                }
            }
        }
        if self.logical_start().is_none() {
            return Err("machine has no resolvable logical start node".to_string());
        }
        Ok(())
    }

    /// The logical start: an `init`-typed node, else the unique node with no
    /// incoming edges, else the first declared node.
    pub fn logical_start(&self) -> Option<String> {
        if let Some((name, _)) = self
            .iter_nodes()
            .find(|(_, node)| node.node_type.as_deref() == Some("init"))
        {
            return Some(name);
        }

        let mut has_incoming: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for edge in &self.edges {
            for segment in &edge.segments {
                has_incoming.insert(segment.target.as_str());
            }
        }
        let without_incoming: Vec<String> = self
            .iter_nodes()
            .filter(|(name, _)| !has_incoming.contains(name.as_str()))
            .map(|(name, _)| name)
            .collect();
        if without_incoming.len() == 1 {
            return Some(without_incoming.into_iter().next().unwrap());
        }

        self.iter_nodes().next().map(|(name, _)| name)
    }
}

fn collect_nodes<'a>(node: &'a Node, qualified: &str, out: &mut Vec<(String, &'a Node)>) {
    out.push((qualified.to_string(), node));
    for child in &node.nodes {
        let child_qualified = format!("{qualified}.{}", child.name);
        collect_nodes(child, &child_qualified, out);
    }
}
