//! From trait implementations for CmuxError conversions

use super::provider::ProviderError;
use super::types::CmuxError;
use cmux_session::StorageError;

impl From<anyhow::Error> for CmuxError {
    fn from(error: anyhow::Error) -> Self {
        Self::other(error.to_string())
    }
}

impl From<std::io::Error> for CmuxError {
    fn from(error: std::io::Error) -> Self {
        Self::storage(error.to_string())
    }
}

impl From<serde_json::Error> for CmuxError {
    fn from(error: serde_json::Error) -> Self {
        Self::Other {
            message: error.to_string(),
            context: Some("JSON serialization".to_string()),
        }
    }
}

impl From<toml::de::Error> for CmuxError {
    fn from(error: toml::de::Error) -> Self {
        Self::config(format!("Failed to parse TOML: {}", error))
    }
}

impl From<StorageError> for CmuxError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::NotFound(what) => Self::NotFound {
                message: what,
                resource_type: Some("history".to_string()),
            },
            other => Self::storage(other.to_string()),
        }
    }
}

impl From<ProviderError> for CmuxError {
    fn from(error: ProviderError) -> Self {
        Self::llm(&error)
    }
}
