//! Error types for checkpoint and recording operations.

use thiserror::Error;

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur while loading, saving, or replaying execution records.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No execution record exists at the given id.
    #[error("execution record not found: {0}")]
    NotFound(String),

    /// `state.json` hash does not match the machine file's current hash.
    ///
    /// Refuses to resume silently diverged executions; the caller should
    /// surface `--force` as the remedy.
    #[error("machine drift: execution {id} was started from a machine whose hash no longer matches the source file (expected {expected}, found {found})")]
    MachineDrift {
        id: String,
        expected: String,
        found: String,
    },

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying storage error (disk, permissions).
    #[error("storage error: {0}")]
    Storage(String),

    /// A recording was requested during playback but no turn file matches the fingerprint.
    #[error("recording missing for fingerprint {fingerprint} (turn {turn})")]
    RecordingMissing { turn: u64, fingerprint: String },

    /// A recording exists for the turn but its fingerprint differs from the live request.
    #[error("recording mismatch at turn {turn}: expected fingerprint {expected}, request fingerprint {actual}")]
    RecordingMismatch {
        turn: u64,
        expected: String,
        actual: String,
    },

    /// Record and playback directories were both requested for the same session.
    #[error("cannot record and play back the same session simultaneously: {0}")]
    ConflictingMode(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Application-defined error.
    #[error("{0}")]
    Custom(String),
}
