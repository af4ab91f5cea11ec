//! VFS-facing tools: `read_file` / `write_file`.
//!
//! Both operate against a [`VirtualFilesystem`] shared with the
//! `EffectExecutor` that runs them (see `EffectExecutor::with_vfs`), so a
//! path a task node writes is visible to every other node on the same run.
//! Nothing here touches the real filesystem — the sandbox is the whole
//! store, not a directory prefix within it.

use std::sync::Arc;

use async_trait::async_trait;
use dygram_core::executor::VirtualFilesystem;
use dygram_core::tool::{ToolHandler, ToolOutcome};
use serde_json::Value;

use crate::error::ToolError;

pub struct ReadFileTool {
    vfs: Arc<VirtualFilesystem>,
}

impl ReadFileTool {
    pub fn new(vfs: Arc<VirtualFilesystem>) -> Self {
        Self { vfs }
    }
}

#[async_trait]
impl ToolHandler for ReadFileTool {
    async fn call(&self, input: Value) -> ToolOutcome {
        match read_path(&input) {
            Ok(path) => match self.vfs.read(path) {
                Some(content) => ToolOutcome::ok(serde_json::json!({ "path": path, "content": content })),
                None => ToolOutcome::err(format!("no file at '{path}'")),
            },
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }
}

pub struct WriteFileTool {
    vfs: Arc<VirtualFilesystem>,
}

impl WriteFileTool {
    pub fn new(vfs: Arc<VirtualFilesystem>) -> Self {
        Self { vfs }
    }
}

#[async_trait]
impl ToolHandler for WriteFileTool {
    async fn call(&self, input: Value) -> ToolOutcome {
        let path = match read_path(&input) {
            Ok(path) => path,
            Err(e) => return ToolOutcome::err(e.to_string()),
        };
        let content = match input.get("content").and_then(Value::as_str) {
            Some(content) => content,
            None => return ToolOutcome::err(ToolError::InvalidInput("missing 'content' field".to_string()).to_string()),
        };
        self.vfs.write(path, content);
        ToolOutcome::ok(serde_json::json!({ "path": path, "bytes_written": content.len() }))
    }
}

fn read_path(input: &Value) -> Result<&str, ToolError> {
    input
        .get("path")
        .and_then(Value::as_str)
        .filter(|p| !p.starts_with('/') && !p.contains(".."))
        .ok_or_else(|| ToolError::InvalidInput("missing or unsafe 'path' field".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let vfs = Arc::new(VirtualFilesystem::new());
        let write = WriteFileTool::new(vfs.clone());
        let read = ReadFileTool::new(vfs);

        let outcome = write.call(serde_json::json!({"path": "notes/a.txt", "content": "hello"})).await;
        assert!(outcome.success);

        let outcome = read.call(serde_json::json!({"path": "notes/a.txt"})).await;
        assert!(outcome.success);
        assert_eq!(outcome.output["content"], "hello");
    }

    #[tokio::test]
    async fn reading_missing_path_is_a_recoverable_failure() {
        let vfs = Arc::new(VirtualFilesystem::new());
        let read = ReadFileTool::new(vfs);
        let outcome = read.call(serde_json::json!({"path": "nope.txt"})).await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn absolute_paths_are_rejected() {
        let vfs = Arc::new(VirtualFilesystem::new());
        let write = WriteFileTool::new(vfs);
        let outcome = write.call(serde_json::json!({"path": "/etc/passwd", "content": "x"})).await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn parent_traversal_is_rejected() {
        let vfs = Arc::new(VirtualFilesystem::new());
        let write = WriteFileTool::new(vfs);
        let outcome = write.call(serde_json::json!({"path": "../escape.txt", "content": "x"})).await;
        assert!(!outcome.success);
    }
}
