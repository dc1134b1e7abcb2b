//! History inspection and repair commands

use cmux_core::CmuxConfig;
use cmux_core::cmux_session::{
    CommitOutcome, HistoryStore, JsonlHistoryStore, KeyedMutex, Message, MessagePart,
    PartialStore, Role, WorkspaceId,
};
use colored::Colorize;
use dialoguer::Confirm;
use dialoguer::theme::ColorfulTheme;
use std::sync::Arc;

/// Open the stores of the configured session root, sharing one lock table
fn open_partials(config: &CmuxConfig) -> PartialStore {
    let paths = config.session_paths();
    let locks = KeyedMutex::new();
    let history: Arc<dyn HistoryStore> =
        Arc::new(JsonlHistoryStore::with_locks(paths.clone(), locks.clone()));
    PartialStore::new(paths, history, locks)
}

/// Human-readable rendering of one message
pub fn format_message(message: &Message) -> String {
    let sequence = message
        .history_sequence()
        .map(|s| format!("#{}", s))
        .unwrap_or_else(|| "#?".to_string());
    let role = match message.role {
        Role::User => "user".cyan().bold(),
        Role::Assistant => "assistant".green().bold(),
    };

    let mut header = format!("{} {} {}", sequence.dimmed(), role, message.id.dimmed());
    if let Some(model) = &message.metadata.model {
        header.push_str(&format!(" ({})", model));
    }
    if message.is_partial() {
        header.push_str(&format!(" {}", "[partial]".yellow()));
    }
    if let Some(error) = &message.metadata.error {
        let kind = message
            .metadata
            .error_type
            .map(|t| t.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        header.push_str(&format!(" {}", format!("[{}: {}]", kind, error).red()));
    }

    let mut lines = vec![header];
    let text = message.text_content();
    if !text.is_empty() {
        lines.extend(text.lines().map(|line| format!("    {}", line)));
    }
    for part in &message.parts {
        match part {
            MessagePart::Reasoning { text } => {
                lines.push(format!("    {}", format!("thinking: {}", text).dimmed()))
            }
            MessagePart::DynamicTool {
                tool_call_id,
                tool_name,
                state,
                ..
            } => lines.push(format!(
                "    {} {} {}",
                "tool".magenta(),
                tool_name,
                format!("{} {:?}", tool_call_id, state).dimmed()
            )),
            MessagePart::Text { .. } => {}
        }
    }
    if message.is_empty() {
        lines.push(format!("    {}", "(empty)".dimmed()));
    }

    lines.join("\n")
}

pub async fn show_history(
    config: &CmuxConfig,
    workspace_id: &WorkspaceId,
    json: bool,
) -> anyhow::Result<()> {
    let partials = open_partials(config);
    let messages = partials.history().get_all(workspace_id).await?;

    if json {
        for message in &messages {
            println!("{}", serde_json::to_string(message)?);
        }
        return Ok(());
    }

    if messages.is_empty() {
        println!("{}", format!("No history for workspace '{}'.", workspace_id).yellow());
        return Ok(());
    }
    for message in &messages {
        println!("{}", format_message(message));
    }
    if partials.read(workspace_id).await.is_some() {
        println!(
            "\n{}",
            "An uncommitted partial exists; see `cmux partial`.".yellow()
        );
    }
    Ok(())
}

pub async fn show_partial(config: &CmuxConfig, workspace_id: &WorkspaceId) -> anyhow::Result<()> {
    match open_partials(config).read(workspace_id).await {
        Some(partial) => println!("{}", serde_json::to_string_pretty(&partial)?),
        None => println!("{}", "No partial message.".dimmed()),
    }
    Ok(())
}

pub fn describe_outcome(outcome: CommitOutcome) -> String {
    match outcome {
        CommitOutcome::NoPartial => "No partial to commit.".to_string(),
        CommitOutcome::DiscardedErrored => "Discarded errored partial.".to_string(),
        CommitOutcome::Appended(sequence) => format!("Appended partial at #{}.", sequence),
        CommitOutcome::Updated(sequence) => format!("Updated message #{} from partial.", sequence),
        CommitOutcome::Stale(sequence) => {
            format!("History already has message #{}; removed stale partial.", sequence)
        }
    }
}

pub async fn commit(config: &CmuxConfig, workspace_id: &WorkspaceId) -> anyhow::Result<()> {
    let outcome = open_partials(config)
        .commit_to_history(workspace_id)
        .await?;
    println!("{}", describe_outcome(outcome).green());
    Ok(())
}

pub async fn truncate(
    config: &CmuxConfig,
    workspace_id: &WorkspaceId,
    message_id: &str,
) -> anyhow::Result<()> {
    let partials = open_partials(config);
    partials.commit_to_history(workspace_id).await?;
    let removed = partials
        .history()
        .truncate_after(workspace_id, message_id)
        .await?;
    println!(
        "{}",
        format!("Removed {} message(s) starting at '{}'.", removed, message_id).green()
    );
    Ok(())
}

pub async fn clear(config: &CmuxConfig, workspace_id: &WorkspaceId, force: bool) -> anyhow::Result<()> {
    if !force {
        let confirm = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "Delete the whole conversation of workspace '{}'?",
                workspace_id
            ))
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("{}", "Clear cancelled.".dimmed());
            return Ok(());
        }
    }

    let partials = open_partials(config);
    partials.delete(workspace_id).await?;
    partials.history().clear(workspace_id).await?;
    println!(
        "{}",
        format!("Cleared workspace '{}'.", workspace_id).green()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmux_core::cmux_session::StreamErrorType;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_format_message() {
        colored::control::set_override(false);

        let mut message = Message::assistant_placeholder("assistant-1", "test:model").with_parts(vec![
            MessagePart::text("Hello "),
            MessagePart::text("world"),
            MessagePart::tool_call("t1", "bash", json!({})),
        ]);
        message.metadata.history_sequence = Some(3);
        message.metadata.error = Some("overloaded".into());
        message.metadata.error_type = Some(StreamErrorType::ServerError);

        let rendered = format_message(&message);
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(
            lines[0],
            "#3 assistant assistant-1 (test:model) [server_error: overloaded]"
        );
        assert_eq!(lines[1], "    Hello world");
        assert!(lines[2].contains("tool bash t1 InputAvailable"));
    }

    #[test]
    fn test_describe_outcome() {
        assert_eq!(describe_outcome(CommitOutcome::Updated(4)), "Updated message #4 from partial.");
        assert_eq!(describe_outcome(CommitOutcome::NoPartial), "No partial to commit.");
    }

    #[tokio::test]
    async fn test_truncate_and_clear() {
        let temp = TempDir::new().unwrap();
        let config = CmuxConfig {
            root_dir: temp.path().to_path_buf(),
            ..CmuxConfig::default()
        };
        let ws = WorkspaceId::new("ws");
        let partials = open_partials(&config);
        let first = Message::user("one");
        let second = Message::user("two");
        partials.history().append(&ws, first).await.unwrap();
        partials.history().append(&ws, second.clone()).await.unwrap();

        truncate(&config, &ws, &second.id).await.unwrap();
        assert_eq!(partials.history().get_all(&ws).await.unwrap().len(), 1);

        clear(&config, &ws, true).await.unwrap();
        assert!(partials.history().get_all(&ws).await.unwrap().is_empty());
    }
}
