//! Ambient configuration surface. One explicit, serializable struct threaded
//! through construction — the core never reads an environment variable or a
//! file itself; only the CLI's config-loading layer does, handing the engine
//! an already-resolved [`RuntimeConfig`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Budgets and directory roots the runtime and turn loop consult.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_steps: u64,
    pub max_node_invocations: u64,
    pub cycle_detection_window: usize,
    pub step_timeout: Duration,
    pub turn_timeout: Duration,
    pub execution_timeout: Duration,
    pub execution_dir: String,
    pub recordings_dir: String,
    pub default_model: String,
    pub vfs_root: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_steps: 1000,
            max_node_invocations: 100,
            cycle_detection_window: 16,
            step_timeout: Duration::from_secs(30),
            turn_timeout: Duration::from_secs(120),
            execution_timeout: Duration::from_secs(3600),
            execution_dir: ".dygram/executions".to_string(),
            recordings_dir: ".dygram/recordings".to_string(),
            default_model: "claude-sonnet-4".to_string(),
            vfs_root: ".dygram/vfs".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Merge a partially-specified project file over the built-in defaults.
    /// CLI flags are applied by the caller afterward so the precedence stays
    /// CLI-flag > env-var > project-file > built-in-default.
    pub fn merge_project_file(mut self, file: PartialRuntimeConfig) -> Self {
        if let Some(v) = file.max_steps {
            self.max_steps = v;
        }
        if let Some(v) = file.max_node_invocations {
            self.max_node_invocations = v;
        }
        if let Some(v) = file.cycle_detection_window {
            self.cycle_detection_window = v;
        }
        if let Some(v) = file.step_timeout_secs {
            self.step_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.turn_timeout_secs {
            self.turn_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.execution_timeout_secs {
            self.execution_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.execution_dir {
            self.execution_dir = v;
        }
        if let Some(v) = file.recordings_dir {
            self.recordings_dir = v;
        }
        if let Some(v) = file.default_model {
            self.default_model = v;
        }
        if let Some(v) = file.vfs_root {
            self.vfs_root = v;
        }
        self
    }
}

/// Shape of `dygram.toml` — every field optional since the project file is
/// one of several layers, not a full config by itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialRuntimeConfig {
    pub max_steps: Option<u64>,
    pub max_node_invocations: Option<u64>,
    pub cycle_detection_window: Option<usize>,
    pub step_timeout_secs: Option<u64>,
    pub turn_timeout_secs: Option<u64>,
    pub execution_timeout_secs: Option<u64>,
    pub execution_dir: Option<String>,
    pub recordings_dir: Option<String>,
    pub default_model: Option<String>,
    pub vfs_root: Option<String>,
}
