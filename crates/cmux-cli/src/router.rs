//! Command routing logic for CLI

use crate::args::{Cli, Commands};
use crate::commands::{self, RunOptions};
use crate::logging;
use anyhow::Context;
use cmux_core::cmux_session::WorkspaceId;
use cmux_core::load_config;
use std::path::PathBuf;
use std::process::ExitCode;

/// Expand `~` and environment variables in a user-supplied path
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(path),
    }
}

/// Load configuration, install logging and run the selected command
pub async fn route(cli: Cli) -> anyhow::Result<ExitCode> {
    let config_path = cli.config.as_deref().map(expand_path);
    let config = load_config(config_path.as_deref()).context("loading configuration")?;
    logging::init(&config.logging, cli.log_level.as_deref())?;

    tracing::debug!(root = %config.root_dir.display(), "Configuration loaded");

    match cli.command {
        Commands::Run {
            workspace,
            script,
            model,
            edit,
            resume,
            message,
        } => {
            let options = RunOptions {
                workspace_id: WorkspaceId::new(workspace.workspace),
                script: expand_path(&script.to_string_lossy()),
                model,
                edit_message_id: edit,
                resume,
                message,
            };
            commands::run::execute(config, options).await
        }
        Commands::History { workspace, json } => {
            commands::history::show_history(&config, &WorkspaceId::new(workspace.workspace), json)
                .await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Partial { workspace } => {
            commands::history::show_partial(&config, &WorkspaceId::new(workspace.workspace))
                .await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Commit { workspace } => {
            commands::history::commit(&config, &WorkspaceId::new(workspace.workspace)).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Truncate { workspace, after } => {
            commands::history::truncate(&config, &WorkspaceId::new(workspace.workspace), &after)
                .await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Clear { workspace, force } => {
            commands::history::clear(&config, &WorkspaceId::new(workspace.workspace), force)
                .await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
