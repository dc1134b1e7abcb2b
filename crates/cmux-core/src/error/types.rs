//! Core error types and traits for cmux

use cmux_session::StreamErrorType;
use thiserror::Error;

/// Result type alias for cmux operations
pub type CmuxResult<T> = Result<T, CmuxError>;

/// Common surface of every cmux error
pub trait UnifiedError: std::error::Error + Send + Sync {
    /// Stable code for programmatic handling
    fn error_code(&self) -> &str;

    /// Human-readable message
    fn message(&self) -> &str;

    /// Check if this error is retryable
    fn is_retryable(&self) -> bool {
        false
    }
}

/// Main error type for cmux
#[derive(Error, Debug, Clone)]
pub enum CmuxError {
    /// Configuration related errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        context: Option<String>,
    },

    /// Model provider errors, already classified
    #[error("LLM error ({error_type}): {message}")]
    Llm {
        message: String,
        provider: Option<String>,
        error_type: StreamErrorType,
        retryable: bool,
    },

    /// History or partial persistence errors
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        context: Option<String>,
    },

    /// Invalid input errors
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        field: Option<String>,
    },

    /// An operation exceeded its deadline
    #[error("Operation timed out after {millis} ms")]
    Timeout {
        millis: u64,
        context: Option<String>,
    },

    /// Stream or operation was cancelled
    #[error("Operation was cancelled")]
    Cancelled,

    /// Resource not found
    #[error("Not found: {message}")]
    NotFound {
        message: String,
        resource_type: Option<String>,
    },

    /// Generic error with context
    #[error("Error: {message}")]
    Other {
        message: String,
        context: Option<String>,
    },
}

impl CmuxError {
    /// Map this error into the stream error taxonomy
    pub fn stream_error_type(&self) -> StreamErrorType {
        match self {
            Self::Llm { error_type, .. } => *error_type,
            Self::Cancelled => StreamErrorType::Aborted,
            Self::Timeout { .. } => StreamErrorType::Network,
            _ => StreamErrorType::Unknown,
        }
    }

    /// Get optional context about the error
    pub fn context(&self) -> Option<&str> {
        match self {
            Self::Config { context, .. }
            | Self::Storage { context, .. }
            | Self::Timeout { context, .. }
            | Self::Other { context, .. } => context.as_deref(),
            _ => None,
        }
    }
}

impl UnifiedError for CmuxError {
    fn error_code(&self) -> &str {
        match self {
            Self::Config { .. } => "CMUX_CONFIG",
            Self::Llm { .. } => "CMUX_LLM",
            Self::Storage { .. } => "CMUX_STORAGE",
            Self::InvalidInput { .. } => "CMUX_INVALID_INPUT",
            Self::Timeout { .. } => "CMUX_TIMEOUT",
            Self::Cancelled => "CMUX_CANCELLED",
            Self::NotFound { .. } => "CMUX_NOT_FOUND",
            Self::Other { .. } => "CMUX_OTHER",
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::Config { message, .. } => message,
            Self::Llm { message, .. } => message,
            Self::Storage { message, .. } => message,
            Self::InvalidInput { message, .. } => message,
            Self::Timeout { .. } => "Operation timed out",
            Self::Cancelled => "Operation was cancelled",
            Self::NotFound { message, .. } => message,
            Self::Other { message, .. } => message,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Self::Llm { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
            _ => false,
        }
    }
}
