//! Recording / playback of LLM turns keyed by request fingerprint.
//!
//! `recordings/<session>/turn-<n>.json` each hold `{ fingerprint, request, response }`.
//! Readers (playback) and writers (record) never coexist for the same session; callers
//! pick one mode per session, enforced by `RuntimeMode` in `dygram-core`.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CheckpointError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedTurn {
    pub fingerprint: String,
    pub request: Value,
    pub response: Value,
}

/// Append-style writer for `--record` sessions.
pub struct RecordingWriter {
    session_dir: PathBuf,
}

impl RecordingWriter {
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_dir: session_dir.into(),
        }
    }

    pub fn record(&self, turn: u64, fingerprint: &str, request: &Value, response: &Value) -> Result<()> {
        fs::create_dir_all(&self.session_dir)?;
        let turn_record = RecordedTurn {
            fingerprint: fingerprint.to_string(),
            request: request.clone(),
            response: response.clone(),
        };
        let path = self.session_dir.join(format!("turn-{turn}.json"));
        fs::write(path, serde_json::to_vec_pretty(&turn_record)?)?;
        Ok(())
    }
}

/// Lookup-by-fingerprint reader for `--playback` sessions.
pub struct RecordingReader {
    session_dir: PathBuf,
}

impl RecordingReader {
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_dir: session_dir.into(),
        }
    }

    /// Resolve the response recorded for `turn`, verifying it matches `fingerprint`.
    pub fn playback(&self, turn: u64, fingerprint: &str) -> Result<Value> {
        let path = self.session_dir.join(format!("turn-{turn}.json"));
        if !path.is_file() {
            return Err(CheckpointError::RecordingMissing {
                turn,
                fingerprint: fingerprint.to_string(),
            });
        }
        let recorded: RecordedTurn = serde_json::from_slice(&fs::read(path)?)?;
        if recorded.fingerprint != fingerprint {
            return Err(CheckpointError::RecordingMismatch {
                turn,
                expected: recorded.fingerprint,
                actual: fingerprint.to_string(),
            });
        }
        Ok(recorded.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_playback_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RecordingWriter::new(dir.path());
        writer
            .record(1, "fp-a", &Value::String("req".into()), &Value::String("resp".into()))
            .unwrap();

        let reader = RecordingReader::new(dir.path());
        let response = reader.playback(1, "fp-a").unwrap();
        assert_eq!(response, Value::String("resp".into()));
    }

    #[test]
    fn mismatched_fingerprint_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RecordingWriter::new(dir.path());
        writer
            .record(1, "fp-a", &Value::Null, &Value::Null)
            .unwrap();

        let reader = RecordingReader::new(dir.path());
        let err = reader.playback(1, "fp-b").unwrap_err();
        assert!(matches!(err, CheckpointError::RecordingMismatch { .. }));
    }

    #[test]
    fn missing_turn_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let reader = RecordingReader::new(dir.path());
        let err = reader.playback(7, "fp").unwrap_err();
        assert!(matches!(err, CheckpointError::RecordingMissing { .. }));
    }
}
