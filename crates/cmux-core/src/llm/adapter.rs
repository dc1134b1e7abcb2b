//! Streaming model adapter trait and event types

use crate::error::ProviderError;
use async_trait::async_trait;
use cmux_session::{LanguageModelUsage, Message};
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Tool exposed to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// Everything a provider needs to produce one assistant message
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// `provider:model` identifier
    pub model: String,
    pub messages: Vec<Message>,
    pub system_prompt: String,
    pub tools: Vec<ToolDefinition>,
    /// Provider-specific options, passed through untouched
    pub provider_options: serde_json::Value,
    /// Cancelled when the stream is stopped or superseded
    pub cancellation: CancellationToken,
}

/// Event produced by a model stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ModelEvent {
    Start,

    TextDelta {
        text: String,
    },

    ReasoningDelta {
        text: String,
    },

    ReasoningEnd,

    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        output: serde_json::Value,
    },

    #[serde(rename_all = "camelCase")]
    ToolError {
        tool_call_id: String,
        tool_name: String,
        error: serde_json::Value,
    },

    #[serde(rename_all = "camelCase")]
    Finish {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },

    Error {
        error: ProviderError,
    },
}

impl ModelEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::ReasoningDelta { text: text.into() }
    }

    pub fn tool_call(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolCall {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            input,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: serde_json::Value,
    ) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            output,
        }
    }

    pub fn finish() -> Self {
        Self::Finish {
            finish_reason: Some("stop".to_string()),
        }
    }
}

/// Stream of model events
pub type ModelEventStream = BoxStream<'static, ModelEvent>;

/// Usage resolved after the stream completes
pub type LazyUsage = BoxFuture<'static, Option<LanguageModelUsage>>;

/// Provider metadata resolved after the stream completes
pub type LazyProviderMetadata = BoxFuture<'static, Option<serde_json::Value>>;

/// A started generation
pub struct ModelResponse {
    pub events: ModelEventStream,
    pub usage: LazyUsage,
    pub provider_metadata: LazyProviderMetadata,
}

impl ModelResponse {
    /// Response whose usage and metadata resolve immediately to nothing
    pub fn new(events: ModelEventStream) -> Self {
        Self {
            events,
            usage: futures::future::ready(None).boxed(),
            provider_metadata: futures::future::ready(None).boxed(),
        }
    }

    pub fn with_usage(mut self, usage: LazyUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_provider_metadata(mut self, metadata: LazyProviderMetadata) -> Self {
        self.provider_metadata = metadata;
        self
    }
}

impl std::fmt::Debug for ModelResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelResponse").finish_non_exhaustive()
    }
}

/// Streaming model backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Start a generation.
    ///
    /// Errors returned here (missing credentials, unknown model) happen before
    /// any event is produced. Failures after that arrive as
    /// [`ModelEvent::Error`] inside the stream.
    async fn generate(&self, request: GenerateRequest) -> Result<ModelResponse, ProviderError>;
}
