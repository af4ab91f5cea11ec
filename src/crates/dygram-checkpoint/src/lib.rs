//! # dygram-checkpoint - Execution Record Persistence
//!
//! Stateless CLI re-entry for DyGram hinges on one idea: everything the turn loop
//! needs to resume lives in a plain directory on disk, keyed by execution id. This
//! crate owns that directory exclusively — `dygram-core` never touches the
//! filesystem directly, it asks this crate to load/save an [`ExecutionRecord`].
//!
//! Two independent concerns live here:
//!
//! - [`store`] — the execution record itself: `state.json`, `metadata.json`,
//!   `machine.json`, `history.jsonl`, and the `last` symlink. Detects machine
//!   drift on load.
//! - [`recording`] — `--record`/`--playback` turn files keyed by request
//!   fingerprint, independent of the execution record.
//!
//! Both are generic over the persisted state type so this crate has no
//! dependency on `dygram-core`'s `ExecutionState`; the engine instantiates
//! [`ExecutionStore<S>`]... in practice [`ExecutionStore`] is generic per-call
//! via `save`/`load`, not per-struct, so one store serves any serializable state.

pub mod error;
pub mod record;
pub mod recording;
pub mod store;

pub use error::{CheckpointError, Result};
pub use record::{ExecutionMetadata, ExecutionMode, ExecutionRecord, ExecutionStatus, HistoryEntry};
pub use recording::{RecordedTurn, RecordingReader, RecordingWriter};
pub use store::{hash_bytes, ExecutionStore};
