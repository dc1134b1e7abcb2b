//! Structured failure reported by a model provider

use super::classifiers::classify_provider_error;
use super::types::UnifiedError;
use cmux_session::StreamErrorType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised by a model adapter, either when the request is built or as an
/// `error` event inside the stream.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message}")]
#[serde(rename_all = "camelCase")]
pub struct ProviderError {
    pub message: String,

    /// Provider name (`anthropic`, `openai`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// HTTP status of the failed request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    /// Provider error type, e.g. `rate_limit_error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    /// Provider error code, e.g. `insufficient_quota`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default)]
    pub retryable: bool,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            provider: None,
            status_code: None,
            error_type: None,
            code: None,
            retryable: false,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn classify(&self) -> StreamErrorType {
        classify_provider_error(self)
    }
}

impl UnifiedError for ProviderError {
    fn error_code(&self) -> &str {
        "CMUX_PROVIDER"
    }

    fn message(&self) -> &str {
        &self.message
    }

    fn is_retryable(&self) -> bool {
        self.retryable
    }
}
