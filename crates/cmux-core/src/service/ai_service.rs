//! AI service: turns user actions into stream manager calls
//!
//! Builds the model conversation from history, reserves the assistant slot
//! with a placeholder and hands over to the [`StreamManager`]. Also exposes
//! the history maintenance operations that must not race with a stream.

use crate::config::CmuxConfig;
use crate::error::{CmuxError, CmuxResult};
use crate::events::{EventBus, StreamEvent, WorkspaceEvent};
use crate::llm::{ModelAdapter, ToolDefinition};
use crate::stream::{StreamInfo, StreamManager, StreamRequest};
use cmux_session::{
    CommitOutcome, HistoryStore, JsonlHistoryStore, KeyedMutex, Message, PartialStore, Role,
    WorkspaceId, new_message_id,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Per-request overrides for a generation
#[derive(Debug, Clone, Default)]
pub struct SendMessageOptions {
    /// Model to use instead of the configured default
    pub model: Option<String>,
    /// System prompt to use instead of the configured one
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub provider_options: Option<serde_json::Value>,
    /// Replace this earlier user message and everything after it
    pub edit_message_id: Option<String>,
    /// Caller-owned token; cancelling it stops the stream
    pub cancellation: Option<CancellationToken>,
}

impl SendMessageOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn editing(mut self, message_id: impl Into<String>) -> Self {
        self.edit_message_id = Some(message_id.into());
        self
    }
}

/// Entry point for chat operations on a workspace
pub struct AiService {
    config: CmuxConfig,
    streams: StreamManager,
    history: Arc<dyn HistoryStore>,
    partials: Arc<PartialStore>,
}

impl AiService {
    /// Create a service backed by the JSONL stores under the configured root
    pub fn new(config: CmuxConfig, adapter: Arc<dyn ModelAdapter>) -> Self {
        let paths = config.session_paths();
        let locks = KeyedMutex::new();
        let history: Arc<dyn HistoryStore> =
            Arc::new(JsonlHistoryStore::with_locks(paths.clone(), locks.clone()));
        let partials = Arc::new(PartialStore::new(paths, history.clone(), locks));
        Self::with_partials(config, adapter, partials)
    }

    /// Create a service over an existing partial store and its history
    pub fn with_partials(
        config: CmuxConfig,
        adapter: Arc<dyn ModelAdapter>,
        partials: Arc<PartialStore>,
    ) -> Self {
        let events = EventBus::new(config.stream.event_capacity);
        let streams = StreamManager::new(adapter, partials.clone(), events, config.stream.clone());
        Self {
            history: partials.history().clone(),
            config,
            streams,
            partials,
        }
    }

    pub fn config(&self) -> &CmuxConfig {
        &self.config
    }

    pub fn streams(&self) -> &StreamManager {
        &self.streams
    }

    pub fn events(&self) -> &EventBus {
        self.streams.events()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.streams.events().subscribe()
    }

    /// Append a user message and start generating the reply.
    ///
    /// An active stream is interrupted and its partial committed first. With
    /// `edit_message_id` the edited message and everything after it are
    /// removed before the new message is appended. Returns the id of the
    /// assistant message being generated.
    pub async fn send_message(
        &self,
        workspace_id: &WorkspaceId,
        text: &str,
        options: SendMessageOptions,
    ) -> CmuxResult<String> {
        if text.trim().is_empty() {
            return Err(CmuxError::invalid_field("message", "message must not be empty"));
        }

        self.interrupt(workspace_id).await?;

        if let Some(edit_id) = &options.edit_message_id {
            let removed = self.history.truncate_after(workspace_id, edit_id).await?;
            info!(
                workspace_id = %workspace_id,
                message_id = %edit_id,
                removed,
                "Truncated history for edit"
            );
        }

        let user = Message::user(text);
        let sequence = self.history.append(workspace_id, user.clone()).await?;
        info!(
            workspace_id = %workspace_id,
            message_id = %user.id,
            history_sequence = sequence,
            "Appended user message"
        );

        self.start(workspace_id, options).await
    }

    /// Continue generating without a new user message, e.g. after an
    /// interrupted turn
    pub async fn resume_stream(
        &self,
        workspace_id: &WorkspaceId,
        options: SendMessageOptions,
    ) -> CmuxResult<String> {
        self.interrupt(workspace_id).await?;
        self.start(workspace_id, options).await
    }

    /// Stop the active stream and fold its partial into history
    async fn interrupt(&self, workspace_id: &WorkspaceId) -> CmuxResult<()> {
        if self.streams.stop_stream(workspace_id).await {
            info!(workspace_id = %workspace_id, "Interrupted active stream");
        }
        self.partials.commit_to_history(workspace_id).await?;
        Ok(())
    }

    async fn start(
        &self,
        workspace_id: &WorkspaceId,
        options: SendMessageOptions,
    ) -> CmuxResult<String> {
        let messages: Vec<Message> = self
            .history
            .get_all(workspace_id)
            .await?
            .into_iter()
            .filter(|m| m.role == Role::User || !(m.is_empty() || m.is_errored()))
            .collect();
        if messages.is_empty() {
            return Err(CmuxError::invalid_input(format!(
                "workspace {} has no conversation to continue",
                workspace_id
            )));
        }

        let model = options
            .model
            .unwrap_or_else(|| self.config.default_model.clone());
        let system_prompt = options
            .system_prompt
            .or_else(|| self.config.system_prompt.clone())
            .unwrap_or_default();

        let message_id = new_message_id(Role::Assistant);
        let placeholder = Message::assistant_placeholder(message_id.clone(), model.clone());
        let history_sequence = self.history.append(workspace_id, placeholder).await?;

        let mut request = StreamRequest::new(workspace_id.clone(), messages, model, history_sequence)
            .with_message_id(message_id.clone())
            .with_system_prompt(system_prompt)
            .with_tools(options.tools);
        if let Some(provider_options) = options.provider_options {
            request = request.with_provider_options(provider_options);
        }
        if let Some(token) = options.cancellation {
            request = request.with_cancellation(token);
        }

        match self.streams.start_stream(request).await {
            Ok(id) => Ok(id),
            Err(e) => {
                if let Err(cleanup) = self.history.truncate_after(workspace_id, &message_id).await {
                    warn!(
                        workspace_id = %workspace_id,
                        message_id = %message_id,
                        "Failed to remove placeholder after failed start: {}", cleanup
                    );
                }
                Err(e)
            }
        }
    }

    pub fn is_streaming(&self, workspace_id: &WorkspaceId) -> bool {
        self.streams.is_streaming(workspace_id)
    }

    pub async fn stop_stream(&self, workspace_id: &WorkspaceId) -> bool {
        self.streams.stop_stream(workspace_id).await
    }

    /// Wait until the active stream, if any, has fully finished
    pub async fn wait_idle(&self, workspace_id: &WorkspaceId) {
        self.streams.wait_idle(workspace_id).await
    }

    pub fn get_stream_info(&self, workspace_id: &WorkspaceId) -> Option<StreamInfo> {
        self.streams.get_stream_info(workspace_id)
    }

    pub fn replay_stream(&self, workspace_id: &WorkspaceId) -> Option<Vec<StreamEvent>> {
        self.streams.replay_stream(workspace_id)
    }

    pub async fn get_history(&self, workspace_id: &WorkspaceId) -> CmuxResult<Vec<Message>> {
        Ok(self.history.get_all(workspace_id).await?)
    }

    pub async fn read_partial(&self, workspace_id: &WorkspaceId) -> Option<Message> {
        self.partials.read(workspace_id).await
    }

    pub async fn commit_partial(&self, workspace_id: &WorkspaceId) -> CmuxResult<CommitOutcome> {
        Ok(self.partials.commit_to_history(workspace_id).await?)
    }

    /// Remove `message_id` and everything after it. Returns the number of
    /// removed messages.
    pub async fn truncate_history(
        &self,
        workspace_id: &WorkspaceId,
        message_id: &str,
    ) -> CmuxResult<usize> {
        self.interrupt(workspace_id).await?;
        Ok(self.history.truncate_after(workspace_id, message_id).await?)
    }

    /// Forget the whole conversation, including any partial
    pub async fn clear_history(&self, workspace_id: &WorkspaceId) -> CmuxResult<()> {
        self.streams.stop_stream(workspace_id).await;
        self.partials.delete(workspace_id).await?;
        self.history.clear(workspace_id).await?;
        info!(workspace_id = %workspace_id, "Cleared history");
        Ok(())
    }
}
