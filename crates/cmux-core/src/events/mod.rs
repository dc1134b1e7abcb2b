//! Outbound stream events
//!
//! The stream manager publishes every observable change of a generation as a
//! `StreamEvent` on a broadcast `EventBus`. Transports and UIs subscribe
//! without the manager knowing who they are.

use cmux_session::{MessageMetadata, MessagePart, StreamErrorType, WorkspaceId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted for one assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    StreamStart {
        message_id: String,
        model: String,
        history_sequence: u64,
    },

    #[serde(rename_all = "camelCase")]
    StreamDelta { message_id: String, delta: String },

    #[serde(rename_all = "camelCase")]
    ReasoningDelta { message_id: String, delta: String },

    #[serde(rename_all = "camelCase")]
    ReasoningEnd { message_id: String },

    #[serde(rename_all = "camelCase")]
    ToolCallStart {
        message_id: String,
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },

    #[serde(rename_all = "camelCase")]
    ToolCallEnd {
        message_id: String,
        tool_call_id: String,
        tool_name: String,
        result: serde_json::Value,
    },

    #[serde(rename_all = "camelCase")]
    StreamEnd {
        message_id: String,
        metadata: MessageMetadata,
        parts: Vec<MessagePart>,
    },

    #[serde(rename_all = "camelCase")]
    StreamAbort {
        message_id: String,
        #[serde(default)]
        metadata: MessageMetadata,
    },

    #[serde(rename_all = "camelCase")]
    Error {
        message_id: String,
        error: String,
        error_type: StreamErrorType,
    },
}

impl StreamEvent {
    pub fn message_id(&self) -> &str {
        match self {
            Self::StreamStart { message_id, .. }
            | Self::StreamDelta { message_id, .. }
            | Self::ReasoningDelta { message_id, .. }
            | Self::ReasoningEnd { message_id }
            | Self::ToolCallStart { message_id, .. }
            | Self::ToolCallEnd { message_id, .. }
            | Self::StreamEnd { message_id, .. }
            | Self::StreamAbort { message_id, .. }
            | Self::Error { message_id, .. } => message_id,
        }
    }

    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StreamStart { .. } => "stream-start",
            Self::StreamDelta { .. } => "stream-delta",
            Self::ReasoningDelta { .. } => "reasoning-delta",
            Self::ReasoningEnd { .. } => "reasoning-end",
            Self::ToolCallStart { .. } => "tool-call-start",
            Self::ToolCallEnd { .. } => "tool-call-end",
            Self::StreamEnd { .. } => "stream-end",
            Self::StreamAbort { .. } => "stream-abort",
            Self::Error { .. } => "error",
        }
    }

    /// Whether no further events follow for this message
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::StreamEnd { .. } | Self::StreamAbort { .. } | Self::Error { .. }
        )
    }
}

/// A stream event scoped to the workspace that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceEvent {
    pub workspace_id: WorkspaceId,
    #[serde(flatten)]
    pub event: StreamEvent,
}

/// Event bus for stream event distribution
///
/// Each subscriber receives a copy of every event published after it
/// subscribed. Slow subscribers lag and lose the oldest events once the
/// buffer is full; the publisher never blocks.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkspaceEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus with the specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Publish an event to all subscribers
    ///
    /// Returns the number of receivers, 0 when nobody listens.
    pub fn publish(&self, workspace_id: &WorkspaceId, event: StreamEvent) -> usize {
        tracing::trace!(
            workspace_id = %workspace_id,
            message_id = %event.message_id(),
            event_type = event.event_type(),
            "emit stream event"
        );
        self.sender
            .send(WorkspaceEvent {
                workspace_id: workspace_id.clone(),
                event,
            })
            .unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    /// Create a default event bus with capacity of 256 events
    fn default() -> Self {
        Self::new(crate::config::StreamConfig::default().event_capacity)
    }
}
