//! # dygram-core — execution engine for DyGram state-machine / workflow graphs
//!
//! A DyGram machine is a declarative graph of nodes and edges — some nodes
//! are plain control-flow states, others are LLM-driven tasks that hold an
//! open conversation until the model signals it's done. This crate owns the
//! whole lifecycle of running one: parsing the machine's annotations,
//! building a cached descriptor per node, stepping execution one path at a
//! time, and persisting/resuming/visualizing the result.
//!
//! ## Module Organization
//!
//! ### Machine definition
//! - [`machine`] - the JSON data model a compiled graph is expressed in
//! - [`annotation`] - `barrier`/`async`/`meta`/`strict` annotation parsing
//! - [`descriptor`] - per-node [`descriptor::NodeDescriptor`] derivation
//!
//! ### Execution
//! - [`state`] - [`state::ExecutionState`], the one piece of data the runtime owns
//! - [`effect`] - the `Effect`/`Observation` protocol between pure core and I/O shell
//! - [`runtime`] - [`runtime::Runtime`], the pure decision core (`stepPath`/`apply`)
//! - [`executor`] - [`executor::EffectExecutor`], the imperative shell (LLM/tool I/O)
//! - [`turn_loop`] - [`turn_loop::MachineExecutor`], the outermost cooperative scheduler
//!
//! ### Supporting services
//! - [`template`] - `{{ path.attr }}` substitution and `when:`/`unless:` guard evaluation
//! - [`tool`] - [`tool::ToolRegistry`] and the [`tool::ToolHandler`] trait
//! - [`fingerprint`] - stable request fingerprints for recording/playback
//! - [`visualization`] - pure projection of state into a renderable snapshot
//! - [`config`] - [`config::RuntimeConfig`], the ambient budgets/paths surface
//! - [`retry`] - exponential backoff policy applied around LLM transport calls
//! - [`error`] - [`error::EngineError`], the one error type this crate returns

pub mod annotation;
pub mod config;
pub mod descriptor;
pub mod effect;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod machine;
pub mod retry;
pub mod runtime;
pub mod state;
pub mod template;
pub mod tool;
pub mod turn_loop;
pub mod visualization;

pub use config::RuntimeConfig;
pub use effect::{Effect, Observation};
pub use error::EngineError;
pub use executor::{EffectExecutor, LlmRequest, LlmResponsePayload, LlmTransport};
pub use machine::Machine;
pub use retry::{RetryPolicy, RetryState};
pub use runtime::Runtime;
pub use state::{ExecutionState, Path, PathStatus, RunMode};
pub use tool::{ToolHandler, ToolOutcome, ToolRegistry};
pub use turn_loop::{MachineExecutor, Suspension};
