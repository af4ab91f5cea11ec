//! Annotation Processor — typed config records for the handful of annotations
//! the runtime cares about (`barrier`, `async`, `meta`, `strict`).
//!
//! The static validator upstream of this crate recognises and normalises a
//! much larger annotation vocabulary; this module only processes the subset
//! that changes execution behaviour. Parsing is total: a malformed value
//! falls back to the annotation's declared default and is logged at `warn`,
//! never rejected.

use tracing::warn;

use crate::machine::Annotation;

/// Barrier/async/meta/strict config derived from one annotation occurrence.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationConfig {
    Barrier(BarrierConfig),
    Async(AsyncConfig),
    Meta(MetaConfig),
    Strict(StrictConfig),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BarrierConfig {
    pub id: String,
    pub merge: bool,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            merge: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AsyncConfig {
    pub enabled: bool,
    pub copy_context: bool,
    pub priority: i64,
    pub name: Option<String>,
}

impl Default for AsyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            copy_context: true,
            priority: 0,
            name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetaConfig {
    pub enabled: bool,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrictConfig {
    pub enabled: bool,
}

impl Default for StrictConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

const BARRIER_ALIASES: [&str; 5] = ["barrier", "wait", "sync", "join", "merge"];
const ASYNC_ALIASES: [&str; 4] = ["async", "spawn", "parallel", "fork"];
const MERGE_IMPLYING_ALIASES: [&str; 2] = ["join", "merge"];

/// Recognise one annotation occurrence, returning its typed config or `None`
/// if the name isn't one the runtime processes at all (e.g. purely cosmetic
/// annotations handled by the diagram generator).
pub fn process(annotation: &Annotation) -> Option<AnnotationConfig> {
    let name = annotation.name.as_str();
    if BARRIER_ALIASES.contains(&name) {
        Some(AnnotationConfig::Barrier(process_barrier(annotation, name)))
    } else if ASYNC_ALIASES.contains(&name) {
        Some(AnnotationConfig::Async(process_async(annotation)))
    } else if name == "meta" {
        Some(AnnotationConfig::Meta(process_meta(annotation)))
    } else if name == "strict" || name == "StrictMode" {
        Some(AnnotationConfig::Strict(process_strict(annotation)))
    } else {
        None
    }
}

fn falsy(value: &serde_json::Value) -> bool {
    matches!(value, serde_json::Value::Bool(false))
        || matches!(value, serde_json::Value::String(s) if s == "false")
}

fn process_barrier(annotation: &Annotation, name: &str) -> BarrierConfig {
    let mut config = BarrierConfig {
        id: "default".to_string(),
        merge: MERGE_IMPLYING_ALIASES.contains(&name),
    };
    if let Some(value) = &annotation.value {
        match value {
            serde_json::Value::String(s) => config.id = s.clone(),
            other => warn!(annotation = name, value = %other, "barrier value is not a string, keeping default id"),
        }
    }
    if let Some(id) = annotation.attributes.get("id") {
        match id {
            serde_json::Value::String(s) => config.id = s.clone(),
            other => warn!(annotation = name, value = %other, "barrier id attribute is not a string, ignoring"),
        }
    }
    if let Some(merge) = annotation.attributes.get("merge") {
        match merge {
            serde_json::Value::Bool(b) => config.merge = *b,
            other => warn!(annotation = name, value = %other, "barrier merge attribute is not a bool, keeping default"),
        }
    }
    config
}

fn process_async(annotation: &Annotation) -> AsyncConfig {
    let mut config = AsyncConfig::default();
    if let Some(value) = &annotation.value {
        if falsy(value) {
            config.enabled = false;
        }
    }
    if let Some(copy_context) = annotation.attributes.get("copyContext") {
        match copy_context {
            serde_json::Value::Bool(b) => config.copy_context = *b,
            other => warn!(value = %other, "async copyContext attribute is not a bool, keeping default"),
        }
    }
    if let Some(priority) = annotation.attributes.get("priority") {
        match priority.as_i64() {
            Some(p) => config.priority = p,
            None => warn!(value = %priority, "async priority attribute is not an integer, keeping default"),
        }
    }
    if let Some(name) = annotation.attributes.get("name") {
        match name {
            serde_json::Value::String(s) => config.name = Some(s.clone()),
            other => warn!(value = %other, "async name attribute is not a string, ignoring"),
        }
    }
    config
}

fn process_meta(annotation: &Annotation) -> MetaConfig {
    let mut config = MetaConfig::default();
    if let Some(value) = &annotation.value {
        if falsy(value) {
            config.enabled = false;
        }
    }
    config
}

fn process_strict(annotation: &Annotation) -> StrictConfig {
    let mut config = StrictConfig::default();
    if let Some(value) = &annotation.value {
        if falsy(value) {
            config.enabled = false;
        }
    }
    config
}

/// Find and process the first annotation in `annotations` matching one of `aliases`.
pub fn find_processed<'a>(
    annotations: &'a [Annotation],
    aliases: &[&str],
) -> Option<(&'a Annotation, AnnotationConfig)> {
    annotations
        .iter()
        .find(|a| aliases.contains(&a.name.as_str()))
        .and_then(|a| process(a).map(|cfg| (a, cfg)))
}

pub fn barrier_of(annotations: &[Annotation]) -> Option<BarrierConfig> {
    find_processed(annotations, &BARRIER_ALIASES).and_then(|(_, cfg)| match cfg {
        AnnotationConfig::Barrier(b) => Some(b),
        _ => None,
    })
}

pub fn async_of(annotations: &[Annotation]) -> Option<AsyncConfig> {
    find_processed(annotations, &ASYNC_ALIASES).and_then(|(_, cfg)| match cfg {
        AnnotationConfig::Async(a) => Some(a),
        _ => None,
    })
}

pub fn meta_of(annotations: &[Annotation]) -> Option<MetaConfig> {
    find_processed(annotations, &["meta"]).and_then(|(_, cfg)| match cfg {
        AnnotationConfig::Meta(m) => Some(m),
        _ => None,
    })
}

pub fn strict_of(annotations: &[Annotation]) -> Option<StrictConfig> {
    find_processed(annotations, &["strict", "StrictMode"]).and_then(|(_, cfg)| match cfg {
        AnnotationConfig::Strict(s) => Some(s),
        _ => None,
    })
}
