//! CLI argument definitions using clap
//!
//! - cmux run --workspace <id> --script <events.jsonl> "message"
//! - cmux history --workspace <id> [--json]
//! - cmux partial | commit | clear --workspace <id>
//! - cmux truncate --workspace <id> --after <message-id>

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cmux")]
#[command(about = "cmux - drive and inspect coding-agent workspace conversations")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (default: <config root>/config.toml)
    #[arg(long, global = true, env = "CMUX_CONFIG")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct WorkspaceArg {
    /// Workspace identifier
    #[arg(long, short = 'w')]
    pub workspace: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a message and stream the reply from a scripted model as JSON lines
    Run {
        #[command(flatten)]
        workspace: WorkspaceArg,

        /// JSONL file with one model event per line
        #[arg(long, short = 's')]
        script: PathBuf,

        /// Model identifier recorded on the reply
        #[arg(long, short = 'm')]
        model: Option<String>,

        /// Replace this earlier user message and everything after it
        #[arg(long)]
        edit: Option<String>,

        /// Continue the conversation without a new user message
        #[arg(long, conflicts_with = "message")]
        resume: bool,

        /// User message to send
        #[arg(required_unless_present = "resume")]
        message: Option<String>,
    },

    /// Show the conversation history of a workspace
    History {
        #[command(flatten)]
        workspace: WorkspaceArg,

        /// Print one JSON message per line
        #[arg(long)]
        json: bool,
    },

    /// Show the in-progress partial message, if any
    Partial {
        #[command(flatten)]
        workspace: WorkspaceArg,
    },

    /// Fold a leftover partial message into history
    Commit {
        #[command(flatten)]
        workspace: WorkspaceArg,
    },

    /// Remove a message and everything after it
    Truncate {
        #[command(flatten)]
        workspace: WorkspaceArg,

        /// Id of the first message to remove
        #[arg(long)]
        after: String,
    },

    /// Delete the history and partial of a workspace
    Clear {
        #[command(flatten)]
        workspace: WorkspaceArg,

        /// Skip the confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "cmux",
            "--log-level",
            "debug",
            "run",
            "-w",
            "ws1",
            "--script",
            "events.jsonl",
            "hello there",
        ])
        .unwrap();

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Commands::Run {
                workspace,
                script,
                message,
                resume,
                ..
            } => {
                assert_eq!(workspace.workspace, "ws1");
                assert_eq!(script, PathBuf::from("events.jsonl"));
                assert_eq!(message.as_deref(), Some("hello there"));
                assert!(!resume);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_run_requires_message_unless_resume() {
        assert!(Cli::try_parse_from(["cmux", "run", "-w", "ws", "-s", "e.jsonl"]).is_err());
        assert!(
            Cli::try_parse_from(["cmux", "run", "-w", "ws", "-s", "e.jsonl", "--resume"]).is_ok()
        );
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli = Cli::try_parse_from([
            "cmux",
            "truncate",
            "--workspace",
            "ws",
            "--after",
            "user-1",
            "--config",
            "/tmp/cmux.toml",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some("/tmp/cmux.toml"));
        assert!(matches!(cli.command, Commands::Truncate { ref after, .. } if after == "user-1"));
    }
}
