//! Conversation data structures
//!
//! Defines the persisted shape of a workspace conversation:
//! - WorkspaceId: branded identifier for an isolated workspace
//! - Message: one finalized (or in-progress) conversation turn
//! - MessagePart: temporally ordered fragments of a message
//! - MessageMetadata: sequence number, model, usage and error flags

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a workspace (one git worktree with its own conversation)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WorkspaceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for WorkspaceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkspaceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message
    User,
    /// Assistant response
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Lifecycle of a tool invocation recorded in a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolPartState {
    /// The model requested the call; no result yet
    InputAvailable,
    /// The tool finished (successfully or with an encoded error)
    OutputAvailable,
}

/// One fragment of a message, in the order it was observed in the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    DynamicTool {
        tool_call_id: String,
        tool_name: String,
        state: ToolPartState,
        input: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
    },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Reasoning { text: text.into() }
    }

    /// A tool call that has been requested but has not produced output yet
    pub fn tool_call(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::DynamicTool {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            state: ToolPartState::InputAvailable,
            input,
            output: None,
        }
    }

    /// Whether this part records the tool call with the given id
    pub fn is_tool_call(&self, id: &str) -> bool {
        matches!(self, Self::DynamicTool { tool_call_id, .. } if tool_call_id == id)
    }

    /// Move a tool part to `output-available` in place.
    ///
    /// Returns `false` (and leaves the part untouched) if this is not a tool
    /// part or the part already carries output.
    pub fn complete_tool(&mut self, result: serde_json::Value) -> bool {
        match self {
            Self::DynamicTool { state, output, .. } if *state == ToolPartState::InputAvailable => {
                *state = ToolPartState::OutputAvailable;
                *output = Some(result);
                true
            }
            _ => false,
        }
    }
}

/// Token accounting reported by the provider for one generation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageModelUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_input_tokens: Option<u64>,
}

/// Classification attached to a failed generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorType {
    Authentication,
    RateLimit,
    ServerError,
    ContextExceeded,
    ModelNotFound,
    RetryFailed,
    Network,
    Aborted,
    Quota,
    Unknown,
}

impl StreamErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::RateLimit => "rate_limit",
            Self::ServerError => "server_error",
            Self::ContextExceeded => "context_exceeded",
            Self::ModelNotFound => "model_not_found",
            Self::RetryFailed => "retry_failed",
            Self::Network => "network",
            Self::Aborted => "aborted",
            Self::Quota => "quota",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for StreamErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Per-message metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// Durable per-workspace ordinal, assigned once by the history store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_sequence: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Model that produced the message (assistant only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<LanguageModelUsage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Set on every snapshot written to the partial slot
    #[serde(default, skip_serializing_if = "is_false")]
    pub partial: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<StreamErrorType>,
}

/// Individual conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

/// Generate a fresh message id for the given role
pub fn new_message_id(role: Role) -> String {
    format!("{}-{}", role, Uuid::new_v4().simple())
}

impl Message {
    /// Create a new user message with a single text part
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: new_message_id(Role::User),
            role: Role::User,
            parts: vec![MessagePart::text(text)],
            metadata: MessageMetadata {
                timestamp: Some(Utc::now()),
                ..Default::default()
            },
        }
    }

    /// Create an empty assistant message that reserves a history slot
    pub fn assistant_placeholder(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            parts: Vec::new(),
            metadata: MessageMetadata {
                timestamp: Some(Utc::now()),
                model: Some(model.into()),
                ..Default::default()
            },
        }
    }

    pub fn with_parts(mut self, parts: Vec<MessagePart>) -> Self {
        self.parts = parts;
        self
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn history_sequence(&self) -> Option<u64> {
        self.metadata.history_sequence
    }

    pub fn is_partial(&self) -> bool {
        self.metadata.partial
    }

    pub fn is_errored(&self) -> bool {
        self.metadata.error.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Concatenate all text parts (adjacent deltas are merged for display)
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}
