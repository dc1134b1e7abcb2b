//! `cmux run`: one turn against a scripted model

use crate::signal_handler::InterruptHandler;
use anyhow::Context;
use cmux_core::cmux_session::WorkspaceId;
use cmux_core::{AiService, CmuxConfig, ScriptedAdapter, SendMessageOptions, StreamEvent};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Exit status after the stream was stopped with Ctrl+C
const EXIT_ABORTED: u8 = 130;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub workspace_id: WorkspaceId,
    pub script: PathBuf,
    pub model: Option<String>,
    pub edit_message_id: Option<String>,
    pub resume: bool,
    pub message: Option<String>,
}

/// Exit status for the terminal event of the turn
pub fn exit_status(event: &StreamEvent) -> Option<u8> {
    match event {
        StreamEvent::StreamEnd { .. } => Some(0),
        StreamEvent::StreamAbort { .. } => Some(EXIT_ABORTED),
        StreamEvent::Error { .. } => Some(1),
        _ => None,
    }
}

pub async fn execute(config: CmuxConfig, options: RunOptions) -> anyhow::Result<ExitCode> {
    run_turn(config, options).await.map(ExitCode::from)
}

async fn run_turn(config: CmuxConfig, options: RunOptions) -> anyhow::Result<u8> {
    let adapter = ScriptedAdapter::from_jsonl(&options.script)
        .with_context(|| format!("loading script {}", options.script.display()))?;
    let service = AiService::new(config, Arc::new(adapter));

    // Listen before sending so a Ctrl+C during start-up still stops the turn
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        InterruptHandler::install(move || async move { cancel.cancel() })
            .context("installing Ctrl+C handler")?
    };

    let status = stream_turn(&service, options, cancel).await;
    drop(interrupt);
    status
}

/// Send (or resume) and print the turn's events until its terminal event
async fn stream_turn(
    service: &AiService,
    options: RunOptions,
    cancel: CancellationToken,
) -> anyhow::Result<u8> {
    let workspace_id = options.workspace_id;

    // Subscribe before sending so stream-start is not missed
    let mut events = service.subscribe();

    let send_options = SendMessageOptions {
        model: options.model,
        edit_message_id: options.edit_message_id,
        cancellation: Some(cancel),
        ..Default::default()
    };
    let message_id = match options.message {
        Some(message) if !options.resume => {
            service
                .send_message(&workspace_id, &message, send_options)
                .await?
        }
        _ => service.resume_stream(&workspace_id, send_options).await?,
    };
    info!(workspace_id = %workspace_id, message_id = %message_id, "Streaming reply");

    let mut stdout = std::io::stdout();
    let status = loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event output fell behind; events were dropped");
                continue;
            }
            Err(RecvError::Closed) => break 1,
        };
        if event.workspace_id != workspace_id || event.event.message_id() != message_id {
            continue;
        }

        writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
        stdout.flush()?;

        if let Some(status) = exit_status(&event.event) {
            break status;
        }
    };

    // History is written after stream-end is published
    service.wait_idle(&workspace_id).await;
    Ok(status)
}
