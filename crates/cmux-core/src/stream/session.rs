//! In-memory state of one generation

use super::writer::PartialWriter;
use cmux_session::{Message, MessageMetadata, MessagePart, WorkspaceId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a registered session.
///
/// A workspace without a registered session is idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    /// Registered, no model event seen yet
    Starting,
    /// At least one model event was handled
    Streaming,
    /// Cancellation requested, cleanup pending
    Stopping,
    /// The stream failed; error partial is being written
    Error,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Streaming => "streaming",
            Self::Stopping => "stopping",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// How the consumption loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// Snapshot of an active session for reconnecting clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub message_id: String,
    pub model: String,
    pub history_sequence: u64,
    pub state: StreamState,
    pub parts: Vec<MessagePart>,
}

/// One generation producing a single assistant message
pub struct StreamSession {
    pub(crate) workspace_id: WorkspaceId,
    pub(crate) message_id: String,
    pub(crate) model: String,
    pub(crate) history_sequence: u64,
    pub(crate) started_at: Instant,
    state: Mutex<StreamState>,
    /// The assistant message being accumulated; shared with the writer
    draft: Arc<Mutex<Message>>,
    pub(crate) cancel_token: CancellationToken,
    pub(crate) writer: PartialWriter,
    outcome: Mutex<Option<StreamOutcome>>,
    done: watch::Sender<bool>,
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("workspace_id", &self.workspace_id)
            .field("message_id", &self.message_id)
            .field("history_sequence", &self.history_sequence)
            .field("state", &self.state())
            .field("parts", &self.draft.lock().parts.len())
            .field("elapsed", &self.started_at.elapsed())
            .finish()
    }
}

impl StreamSession {
    pub(crate) fn new(
        workspace_id: WorkspaceId,
        draft: Arc<Mutex<Message>>,
        model: String,
        history_sequence: u64,
        cancel_token: CancellationToken,
        writer: PartialWriter,
    ) -> Self {
        let message_id = draft.lock().id.clone();
        let (done, _) = watch::channel(false);
        Self {
            workspace_id,
            message_id,
            model,
            history_sequence,
            started_at: Instant::now(),
            state: Mutex::new(StreamState::Starting),
            draft,
            cancel_token,
            writer,
            outcome: Mutex::new(None),
            done,
        }
    }

    /// Build the draft message for a new session
    pub(crate) fn draft(
        message_id: String,
        model: &str,
        history_sequence: u64,
        initial: MessageMetadata,
    ) -> Message {
        let mut metadata = initial;
        metadata.history_sequence = Some(history_sequence);
        metadata.model = Some(model.to_string());
        metadata.timestamp.get_or_insert_with(chrono::Utc::now);
        metadata.partial = false;
        metadata.error = None;
        metadata.error_type = None;

        Message::assistant_placeholder(message_id, model).with_metadata(metadata)
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: StreamState) {
        *self.state.lock() = state;
    }

    /// First event seen: `starting -> streaming`. Stopping and error are kept.
    pub(crate) fn mark_streaming(&self) {
        let mut state = self.state.lock();
        if *state == StreamState::Starting {
            *state = StreamState::Streaming;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub(crate) fn push_part(&self, part: MessagePart) {
        self.draft.lock().parts.push(part);
    }

    /// Record a tool result on the matching `input-available` part.
    ///
    /// Returns `false` when no such part exists and a completed part had to be
    /// appended instead.
    pub(crate) fn complete_tool(
        &self,
        tool_call_id: &str,
        tool_name: &str,
        output: serde_json::Value,
    ) -> bool {
        let mut draft = self.draft.lock();
        if let Some(part) = draft
            .parts
            .iter_mut()
            .find(|part| part.is_tool_call(tool_call_id))
        {
            // A second result for the same call is ignored
            part.complete_tool(output);
            return true;
        }

        let mut part = MessagePart::tool_call(tool_call_id, tool_name, serde_json::Value::Null);
        part.complete_tool(output);
        draft.parts.push(part);
        false
    }

    pub fn parts(&self) -> Vec<MessagePart> {
        self.draft.lock().parts.clone()
    }

    /// Current accumulated message
    pub fn snapshot(&self) -> Message {
        self.draft.lock().clone()
    }

    /// Apply a mutation to the draft, e.g. to attach error fields
    pub(crate) fn update_draft(&self, f: impl FnOnce(&mut Message)) {
        f(&mut self.draft.lock());
    }

    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            message_id: self.message_id.clone(),
            model: self.model.clone(),
            history_sequence: self.history_sequence,
            state: self.state(),
            parts: self.parts(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub(crate) fn set_outcome(&self, outcome: StreamOutcome) {
        *self.outcome.lock() = Some(outcome);
    }

    pub fn outcome(&self) -> Option<StreamOutcome> {
        *self.outcome.lock()
    }

    /// Signal that the consumption loop finished its cleanup
    pub(crate) fn mark_done(&self) {
        self.done.send_replace(true);
    }

    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Wait until the consumption loop finished its cleanup
    pub async fn wait_done(&self) {
        let mut rx = self.done.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|done| *done).await;
    }
}
