//! Configuration for cmux
//!
//! Values come from (lowest to highest precedence): built-in defaults, a
//! TOML or JSON config file, and `CMUX_*` environment variables.

mod loader;
mod logging_config;
mod stream_config;

pub use loader::{apply_env_overrides, load_config, load_from_file};
pub use logging_config::LoggingConfig;
pub use stream_config::StreamConfig;

use crate::error::{CmuxError, CmuxResult};
use cmux_session::SessionPaths;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default model used when a request does not name one
pub const DEFAULT_MODEL: &str = "anthropic:claude-sonnet-4-5";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CmuxConfig {
    /// Config root; sessions live under `<root_dir>/sessions`
    pub root_dir: PathBuf,
    pub default_model: String,
    pub system_prompt: Option<String>,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
}

impl Default for CmuxConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            default_model: DEFAULT_MODEL.to_string(),
            system_prompt: None,
            stream: StreamConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_root_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".cmux"))
        .unwrap_or_else(|| PathBuf::from(".cmux"))
}

impl CmuxConfig {
    pub fn sessions_dir(&self) -> PathBuf {
        self.root_dir.join("sessions")
    }

    pub fn session_paths(&self) -> SessionPaths {
        SessionPaths::new(self.sessions_dir())
    }

    /// Reject configurations the stream manager cannot run with
    pub fn validate(&self) -> CmuxResult<()> {
        if self.default_model.trim().is_empty() {
            return Err(CmuxError::invalid_field(
                "default_model",
                "default model must not be empty",
            ));
        }
        self.stream.validate()?;
        Ok(())
    }
}
