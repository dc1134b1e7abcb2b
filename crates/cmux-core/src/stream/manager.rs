//! Stream manager: at most one generation per workspace

use super::processor;
use super::session::{StreamInfo, StreamSession, StreamState};
use super::writer::PartialWriter;
use crate::config::StreamConfig;
use crate::error::{CmuxError, CmuxResult};
use crate::events::{EventBus, StreamEvent};
use crate::llm::{GenerateRequest, ModelAdapter, ToolDefinition};
use cmux_session::{
    HistoryStore, KeyedMutex, Message, MessageMetadata, PartialStore, Role, WorkspaceId,
    new_message_id,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything needed to start one generation
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub workspace_id: WorkspaceId,
    /// Id of the assistant message; must match the history placeholder
    pub message_id: String,
    pub messages: Vec<Message>,
    pub model: String,
    /// Sequence reserved by the placeholder appended to history
    pub history_sequence: u64,
    pub system_prompt: String,
    pub tools: Vec<ToolDefinition>,
    /// Cancelling this token stops the stream like `stop_stream`
    pub cancellation: CancellationToken,
    pub initial_metadata: MessageMetadata,
    pub provider_options: serde_json::Value,
}

impl StreamRequest {
    pub fn new(
        workspace_id: impl Into<WorkspaceId>,
        messages: Vec<Message>,
        model: impl Into<String>,
        history_sequence: u64,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            message_id: new_message_id(Role::Assistant),
            messages,
            model: model.into(),
            history_sequence,
            system_prompt: String::new(),
            tools: Vec::new(),
            cancellation: CancellationToken::new(),
            initial_metadata: MessageMetadata::default(),
            provider_options: serde_json::Value::Null,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_initial_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.initial_metadata = metadata;
        self
    }

    pub fn with_provider_options(mut self, options: serde_json::Value) -> Self {
        self.provider_options = options;
        self
    }
}

pub(super) struct ManagerInner {
    pub(super) adapter: Arc<dyn ModelAdapter>,
    pub(super) partials: Arc<PartialStore>,
    pub(super) events: EventBus,
    pub(super) config: StreamConfig,
    /// Registered sessions; absence means idle
    pub(super) sessions: DashMap<WorkspaceId, Arc<StreamSession>>,
    start_locks: KeyedMutex,
}

impl ManagerInner {
    pub(super) fn history(&self) -> &Arc<dyn HistoryStore> {
        self.partials.history()
    }

    /// Remove `session` from the map if it is still the registered one
    pub(super) fn unregister(&self, session: &Arc<StreamSession>) {
        self.sessions
            .remove_if(&session.workspace_id, |_, registered| {
                Arc::ptr_eq(registered, session)
            });
    }
}

/// Owns the active generation of every workspace.
///
/// Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct StreamManager {
    inner: Arc<ManagerInner>,
}

impl StreamManager {
    pub fn new(
        adapter: Arc<dyn ModelAdapter>,
        partials: Arc<PartialStore>,
        events: EventBus,
        config: StreamConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                adapter,
                partials,
                events,
                config,
                sessions: DashMap::new(),
                start_locks: KeyedMutex::new(),
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn partials(&self) -> &Arc<PartialStore> {
        &self.inner.partials
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        self.inner.history()
    }

    /// Start a generation and return the assistant message id.
    ///
    /// Any session already running for the workspace is cancelled and fully
    /// torn down first, and its partial is committed to history. Returns once
    /// the new session is registered; the model stream is consumed in the
    /// background and its outcome is reported through the event bus.
    pub async fn start_stream(&self, request: StreamRequest) -> CmuxResult<String> {
        if request.messages.is_empty() {
            return Err(CmuxError::invalid_field(
                "messages",
                "cannot start a stream with an empty conversation",
            ));
        }

        let workspace_id = request.workspace_id.clone();
        let _guard = self.inner.start_locks.acquire(&workspace_id).await;

        self.ensure_idle(&workspace_id).await;

        let cancel_token = request.cancellation.child_token();
        let generate = GenerateRequest {
            model: request.model.clone(),
            messages: request.messages,
            system_prompt: request.system_prompt,
            tools: request.tools,
            provider_options: request.provider_options,
            cancellation: cancel_token.clone(),
        };

        let response = match self.inner.adapter.generate(generate).await {
            Ok(response) => response,
            Err(e) => {
                let err = CmuxError::llm(&e);
                error!(
                    workspace_id = %workspace_id,
                    error_type = %err.stream_error_type(),
                    "Failed to start stream: {}", e
                );
                return Err(err);
            }
        };

        let draft = StreamSession::draft(
            request.message_id,
            &request.model,
            request.history_sequence,
            request.initial_metadata,
        );
        let draft = Arc::new(Mutex::new(draft));
        let writer = PartialWriter::new(
            workspace_id.clone(),
            self.inner.partials.clone(),
            draft.clone(),
            self.inner.config.partial_write_interval(),
        );
        let session = Arc::new(StreamSession::new(
            workspace_id.clone(),
            draft,
            request.model,
            request.history_sequence,
            cancel_token,
            writer,
        ));
        let message_id = session.message_id.clone();

        self.inner
            .sessions
            .insert(workspace_id.clone(), session.clone());
        self.inner.events.publish(
            &workspace_id,
            StreamEvent::StreamStart {
                message_id: message_id.clone(),
                model: session.model.clone(),
                history_sequence: session.history_sequence,
            },
        );
        info!(
            workspace_id = %workspace_id,
            message_id = %message_id,
            history_sequence = session.history_sequence,
            model = %session.model,
            "Stream started"
        );

        tokio::spawn(processor::run(self.inner.clone(), session, response));
        Ok(message_id)
    }

    /// Cancel the registered session, if any, and commit what it produced
    async fn ensure_idle(&self, workspace_id: &WorkspaceId) {
        let Some(previous) = self.session(workspace_id) else {
            return;
        };

        debug!(
            workspace_id = %workspace_id,
            message_id = %previous.message_id,
            "Superseding active stream"
        );
        self.cancel_session(&previous).await;

        if let Err(e) = self.inner.partials.commit_to_history(workspace_id).await {
            warn!(
                workspace_id = %workspace_id,
                message_id = %previous.message_id,
                "Failed to commit superseded partial: {}", e
            );
        }
    }

    /// Stop the stream and wait until its cleanup has finished
    async fn cancel_session(&self, session: &Arc<StreamSession>) {
        session.set_state(StreamState::Stopping);

        if let Err(e) = session.writer.flush().await {
            warn!(
                workspace_id = %session.workspace_id,
                message_id = %session.message_id,
                "Failed to flush partial before cancel: {}", e
            );
        }

        session.cancel_token.cancel();
        // stream-abort is emitted by the loop before it signals done
        session.wait_done().await;
        self.inner.unregister(session);
    }

    /// Stop the active stream. Returns `false` when the workspace was idle.
    pub async fn stop_stream(&self, workspace_id: &WorkspaceId) -> bool {
        let Some(session) = self.session(workspace_id) else {
            return false;
        };
        info!(
            workspace_id = %workspace_id,
            message_id = %session.message_id,
            "Stopping stream"
        );
        self.cancel_session(&session).await;
        true
    }

    pub fn is_streaming(&self, workspace_id: &WorkspaceId) -> bool {
        self.inner.sessions.contains_key(workspace_id)
    }

    pub fn get_stream_info(&self, workspace_id: &WorkspaceId) -> Option<StreamInfo> {
        self.session(workspace_id).map(|session| session.info())
    }

    /// Events that reconstruct the active stream for a late subscriber
    pub fn replay_stream(&self, workspace_id: &WorkspaceId) -> Option<Vec<StreamEvent>> {
        self.session(workspace_id).map(|session| session.replay())
    }

    /// Wait until the workspace has no registered session
    pub async fn wait_idle(&self, workspace_id: &WorkspaceId) {
        while let Some(session) = self.session(workspace_id) {
            session.wait_done().await;
        }
    }

    /// Workspaces with a registered session
    pub fn active_workspaces(&self) -> Vec<WorkspaceId> {
        self.inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Stop every active stream
    pub async fn shutdown(&self) {
        for workspace_id in self.active_workspaces() {
            self.stop_stream(&workspace_id).await;
        }
    }

    fn session(&self, workspace_id: &WorkspaceId) -> Option<Arc<StreamSession>> {
        self.inner
            .sessions
            .get(workspace_id)
            .map(|entry| entry.value().clone())
    }
}
