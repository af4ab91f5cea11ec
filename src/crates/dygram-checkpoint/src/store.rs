//! Execution directory layout and load/save/list/rm/clean operations (§4.8).
//!
//! Layout under `root/<id>/`:
//! ```text
//! state.json       ExecutionState (generic S)
//! metadata.json     ExecutionMetadata
//! machine.json       the machine snapshot
//! history.jsonl      append-only turn log
//! ```
//! plus a `last` symlink under `root/` pointing at the most recently touched id.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{CheckpointError, Result};
use crate::record::{ExecutionMetadata, ExecutionRecord, HistoryEntry};

/// Hex-encoded SHA-256 of `bytes`. Used both for machine-drift detection and,
/// by callers in `dygram-core`, for LLM request fingerprints.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}

/// Manages the on-disk execution directory tree rooted at `root`.
pub struct ExecutionStore {
    root: PathBuf,
}

impl ExecutionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn dir_for(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn ensure_dir(&self, id: &str) -> Result<PathBuf> {
        let dir = self.dir_for(id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Write `state.json`, `metadata.json`, and `machine.json`, then repoint `last`.
    pub fn save<S: Serialize>(
        &self,
        state: &S,
        metadata: &ExecutionMetadata,
        machine_snapshot: &Value,
    ) -> Result<()> {
        let dir = self.ensure_dir(&metadata.id)?;
        write_json(&dir.join("state.json"), state)?;
        write_json(&dir.join("metadata.json"), metadata)?;
        write_json(&dir.join("machine.json"), machine_snapshot)?;
        self.set_last(&metadata.id)?;
        Ok(())
    }

    /// Load an execution record, refusing to resume on machine drift unless `force`.
    pub fn load<S: DeserializeOwned>(
        &self,
        id: &str,
        current_machine_hash: &str,
        force: bool,
    ) -> Result<ExecutionRecord<S>> {
        let dir = self.dir_for(id);
        if !dir.is_dir() {
            return Err(CheckpointError::NotFound(id.to_string()));
        }
        let metadata: ExecutionMetadata = read_json(&dir.join("metadata.json"))?;
        if !force && metadata.machine_hash != current_machine_hash {
            return Err(CheckpointError::MachineDrift {
                id: id.to_string(),
                expected: metadata.machine_hash.clone(),
                found: current_machine_hash.to_string(),
            });
        }
        let state: S = read_json(&dir.join("state.json"))?;
        let machine_snapshot: Value = read_json(&dir.join("machine.json"))?;
        Ok(ExecutionRecord {
            state,
            metadata,
            machine_snapshot,
        })
    }

    /// Append one closed-turn entry to `history.jsonl`.
    pub fn append_history(&self, id: &str, entry: &HistoryEntry) -> Result<()> {
        let dir = self.ensure_dir(id)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("history.jsonl"))?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn read_history(&self, id: &str) -> Result<Vec<HistoryEntry>> {
        let path = self.dir_for(id).join("history.jsonl");
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }

    /// List every execution's metadata, most-recently-executed first.
    pub fn list(&self) -> Result<Vec<ExecutionMetadata>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let meta_path = path.join("metadata.json");
            if meta_path.is_file() {
                out.push(read_json(&meta_path)?);
            }
        }
        out.sort_by(|a: &ExecutionMetadata, b: &ExecutionMetadata| {
            b.last_executed_at.cmp(&a.last_executed_at)
        });
        Ok(out)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        let dir = self.dir_for(id);
        if dir.is_dir() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    /// Remove completed executions, or every execution when `all` is set.
    pub fn clean(&self, all: bool) -> Result<usize> {
        let mut removed = 0;
        for metadata in self.list()? {
            let should_remove = all || matches!(
                metadata.status,
                crate::record::ExecutionStatus::Completed | crate::record::ExecutionStatus::Failed { .. }
            );
            if should_remove {
                self.remove(&metadata.id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Repoint the `last` symlink at `id`'s directory.
    pub fn set_last(&self, id: &str) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let link = self.root.join("last");
        let _ = fs::remove_file(&link);
        #[cfg(unix)]
        std::os::unix::fs::symlink(id, &link)?;
        #[cfg(not(unix))]
        fs::write(&link, id)?;
        Ok(())
    }

    pub fn resolve_last(&self) -> Result<Option<String>> {
        let link = self.root.join("last");
        if !link.exists() {
            return Ok(None);
        }
        #[cfg(unix)]
        {
            let target = fs::read_link(&link)?;
            Ok(target.file_name().map(|n| n.to_string_lossy().into_owned()))
        }
        #[cfg(not(unix))]
        {
            Ok(Some(fs::read_to_string(&link)?))
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(path, bytes)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
