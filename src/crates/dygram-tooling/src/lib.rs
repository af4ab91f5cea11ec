//! Tool handlers for the DyGram execution engine: the VFS-facing
//! `read_file`/`write_file` pair and the `@meta` family
//! (`get_machine_definition`, `update_definition`, `construct_tool`).
//!
//! Everything here implements `dygram_core::tool::ToolHandler` and is meant
//! to be registered into a `dygram_core::tool::ToolRegistry` before a run
//! starts; none of it reaches into the runtime directly.

pub mod error;
pub mod meta;
pub mod tools;

pub use error::{Result, ToolError};
pub use meta::{ConstructToolHandler, GetMachineDefinitionTool, UpdateDefinitionTool};
pub use tools::{ReadFileTool, WriteFileTool};
