//! Configuration for the live Anthropic-backed transport.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Credentials and endpoint for the Anthropic Messages API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: default_timeout(),
        }
    }

    /// Read `ANTHROPIC_API_KEY` and, if set, `ANTHROPIC_MODEL_ID` from the
    /// environment. The CLI's config-loading layer calls this once at
    /// startup; the engine itself never touches the environment.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| TransportError::ApiKeyNotFound("ANTHROPIC_API_KEY".to_string()))?;
        let mut config = Self::new(api_key);
        if let Ok(model) = std::env::var("ANTHROPIC_MODEL_ID") {
            config.model = model;
        }
        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}
