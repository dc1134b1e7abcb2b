//! Event consumption loop and finalization of one session

use super::manager::ManagerInner;
use super::session::{StreamOutcome, StreamSession, StreamState};
use crate::error::ProviderError;
use crate::events::StreamEvent;
use crate::llm::{LazyProviderMetadata, LazyUsage, ModelEvent, ModelEventStream, ModelResponse};
use cmux_session::{LanguageModelUsage, MessageMetadata, MessagePart, StorageError};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Unregisters the session and releases waiters on every exit path,
/// including a panic inside the loop
struct CleanupGuard {
    inner: Arc<ManagerInner>,
    session: Arc<StreamSession>,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.session.writer.close();
        self.inner.unregister(&self.session);
        self.session.mark_done();
        debug!(
            workspace_id = %self.session.workspace_id,
            message_id = %self.session.message_id,
            "Stream session cleaned up"
        );
    }
}

pub(super) async fn run(inner: Arc<ManagerInner>, session: Arc<StreamSession>, response: ModelResponse) {
    let _cleanup = CleanupGuard {
        inner: inner.clone(),
        session: session.clone(),
    };

    let ModelResponse {
        mut events,
        usage,
        provider_metadata,
    } = response;

    let result = consume(&inner, &session, &mut events).await;
    drop(events);

    session.writer.close();
    if let Err(e) = session.writer.flush_final().await {
        warn!(
            workspace_id = %session.workspace_id,
            message_id = %session.message_id,
            "Final partial flush failed: {}", e
        );
    }

    match result {
        _ if session.is_cancelled() => finish_aborted(&inner, &session, usage).await,
        Ok(()) => finish_completed(&inner, &session, usage, provider_metadata).await,
        Err(e) => finish_failed(&inner, &session, e).await,
    }
}

async fn consume(
    inner: &ManagerInner,
    session: &StreamSession,
    events: &mut ModelEventStream,
) -> Result<(), ProviderError> {
    let workspace_id = &session.workspace_id;
    let message_id = &session.message_id;

    loop {
        let event = tokio::select! {
            biased;
            _ = session.cancel_token.cancelled() => return Ok(()),
            event = events.next() => event,
        };
        let Some(event) = event else {
            return Ok(());
        };
        session.mark_streaming();

        match event {
            ModelEvent::TextDelta { text } => {
                session.push_part(MessagePart::text(text.clone()));
                inner.events.publish(
                    workspace_id,
                    StreamEvent::StreamDelta {
                        message_id: message_id.clone(),
                        delta: text,
                    },
                );
                session.writer.schedule().await;
            }
            ModelEvent::ReasoningDelta { text } => {
                session.push_part(MessagePart::reasoning(text.clone()));
                inner.events.publish(
                    workspace_id,
                    StreamEvent::ReasoningDelta {
                        message_id: message_id.clone(),
                        delta: text,
                    },
                );
                session.writer.schedule().await;
            }
            ModelEvent::ReasoningEnd => {
                inner.events.publish(
                    workspace_id,
                    StreamEvent::ReasoningEnd {
                        message_id: message_id.clone(),
                    },
                );
            }
            ModelEvent::ToolCall {
                tool_call_id,
                tool_name,
                input,
            } => {
                session.push_part(MessagePart::tool_call(
                    tool_call_id.clone(),
                    tool_name.clone(),
                    input.clone(),
                ));
                inner.events.publish(
                    workspace_id,
                    StreamEvent::ToolCallStart {
                        message_id: message_id.clone(),
                        tool_call_id,
                        tool_name,
                        args: input,
                    },
                );
            }
            ModelEvent::ToolResult {
                tool_call_id,
                tool_name,
                output,
            } => {
                complete_tool(inner, session, tool_call_id, tool_name, output).await;
            }
            ModelEvent::ToolError {
                tool_call_id,
                tool_name,
                error,
            } => {
                let output = serde_json::json!({ "error": error });
                complete_tool(inner, session, tool_call_id, tool_name, output).await;
            }
            ModelEvent::Finish { finish_reason } => {
                debug!(
                    workspace_id = %workspace_id,
                    message_id = %message_id,
                    finish_reason = finish_reason.as_deref().unwrap_or("unknown"),
                    "Model stream finished"
                );
                return Ok(());
            }
            ModelEvent::Error { error } => return Err(error),
            ModelEvent::Start => {}
        }
    }
}

async fn complete_tool(
    inner: &ManagerInner,
    session: &StreamSession,
    tool_call_id: String,
    tool_name: String,
    output: serde_json::Value,
) {
    if !session.complete_tool(&tool_call_id, &tool_name, output.clone()) {
        warn!(
            workspace_id = %session.workspace_id,
            message_id = %session.message_id,
            tool_call_id = %tool_call_id,
            "Tool result without matching tool call"
        );
    }
    inner.events.publish(
        &session.workspace_id,
        StreamEvent::ToolCallEnd {
            message_id: session.message_id.clone(),
            tool_call_id,
            tool_name,
            result: output,
        },
    );
    session.writer.schedule().await;
}

/// Await a lazily resolved value, giving up at `deadline`
async fn resolve<T>(
    inner: &ManagerInner,
    session: &StreamSession,
    what: &str,
    deadline: Instant,
    future: impl Future<Output = Option<T>>,
) -> Option<T> {
    match tokio::time::timeout_at(deadline, future).await {
        Ok(value) => value,
        Err(_) => {
            warn!(
                workspace_id = %session.workspace_id,
                message_id = %session.message_id,
                timeout_ms = inner.config.usage_timeout_ms,
                "Timed out waiting for {}", what
            );
            None
        }
    }
}

async fn finish_completed(
    inner: &ManagerInner,
    session: &StreamSession,
    usage: LazyUsage,
    provider_metadata: LazyProviderMetadata,
) {
    // One budget for both lazy values
    let deadline = Instant::now() + inner.config.usage_timeout();
    let usage = resolve(inner, session, "usage", deadline, usage).await;
    let provider_metadata =
        resolve(inner, session, "provider metadata", deadline, provider_metadata).await;
    let duration_ms = session.elapsed_ms();

    session.update_draft(|draft| {
        draft.metadata.usage = usage;
        draft.metadata.provider_metadata = provider_metadata;
        draft.metadata.duration_ms = Some(duration_ms);
        draft.metadata.partial = false;
    });
    let message = session.snapshot();

    inner.events.publish(
        &session.workspace_id,
        StreamEvent::StreamEnd {
            message_id: message.id.clone(),
            metadata: message.metadata.clone(),
            parts: message.parts.clone(),
        },
    );

    let mut persisted = true;
    if !message.is_empty() {
        let history = inner.history();
        let result = match history.update(&session.workspace_id, &message).await {
            Err(StorageError::NotFound(_)) => history
                .append(&session.workspace_id, message.clone())
                .await
                .map(|_| ()),
            other => other,
        };
        if let Err(e) = result {
            // Keep the partial so the turn can still be committed later
            persisted = false;
            error!(
                workspace_id = %session.workspace_id,
                message_id = %message.id,
                history_sequence = session.history_sequence,
                "Failed to write final message to history: {}", e
            );
        }
    }

    if persisted {
        if let Err(e) = inner.partials.delete(&session.workspace_id).await {
            warn!(
                workspace_id = %session.workspace_id,
                "Failed to delete partial after completion: {}", e
            );
        }
    }

    session.set_outcome(StreamOutcome::Completed);
    info!(
        workspace_id = %session.workspace_id,
        message_id = %message.id,
        history_sequence = session.history_sequence,
        parts = message.parts.len(),
        duration_ms,
        "Stream completed"
    );
}

async fn finish_aborted(inner: &ManagerInner, session: &StreamSession, usage: LazyUsage) {
    let deadline = Instant::now() + inner.config.usage_timeout();
    let usage: Option<LanguageModelUsage> =
        resolve(inner, session, "usage", deadline, usage).await;

    let metadata = MessageMetadata {
        history_sequence: Some(session.history_sequence),
        model: Some(session.model.clone()),
        usage,
        duration_ms: Some(session.elapsed_ms()),
        ..Default::default()
    };
    inner.events.publish(
        &session.workspace_id,
        StreamEvent::StreamAbort {
            message_id: session.message_id.clone(),
            metadata,
        },
    );

    session.set_outcome(StreamOutcome::Cancelled);
    info!(
        workspace_id = %session.workspace_id,
        message_id = %session.message_id,
        parts = session.parts().len(),
        "Stream aborted"
    );
}

async fn finish_failed(inner: &ManagerInner, session: &StreamSession, err: ProviderError) {
    let error_type = err.classify();
    session.set_state(StreamState::Error);
    session.update_draft(|draft| {
        draft.metadata.error = Some(err.message.clone());
        draft.metadata.error_type = Some(error_type);
    });

    if let Err(e) = session.writer.flush_final().await {
        warn!(
            workspace_id = %session.workspace_id,
            message_id = %session.message_id,
            "Failed to write error partial: {}", e
        );
    }

    inner.events.publish(
        &session.workspace_id,
        StreamEvent::Error {
            message_id: session.message_id.clone(),
            error: err.message.clone(),
            error_type,
        },
    );

    session.set_outcome(StreamOutcome::Failed);
    error!(
        workspace_id = %session.workspace_id,
        message_id = %session.message_id,
        error_type = %error_type,
        "Stream failed: {}", err
    );
}
