//! LLM transport implementations for the DyGram execution engine.
//!
//! `dygram-core` depends on nothing here — it only knows the narrow
//! [`dygram_core::executor::LlmTransport`] trait. This crate supplies the two
//! implementations the engine ships with: [`live::ClaudeTransport`] (a thin
//! HTTP client for the Anthropic Messages API) and [`mock::ScriptedTransport`]
//! (an in-process stand-in for tests and CI).

pub mod config;
pub mod error;
pub mod live;
pub mod mock;

pub use config::AnthropicConfig;
pub use error::{Result, TransportError};
pub use live::ClaudeTransport;
pub use mock::ScriptedTransport;
