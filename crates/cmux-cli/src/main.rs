//! cmux CLI application
//!
//! Headless driver for cmux workspaces. `cmux run` sends a message through
//! the AI service against a scripted model and prints every outbound stream
//! event as one JSON line on stdout; logs go to stderr. The remaining
//! commands inspect and repair the persisted conversation.
//!
//! ```bash
//! cmux run -w demo -s script.jsonl "List the files"
//! cmux history -w demo
//! ```

mod args;
mod commands;
mod logging;
mod router;
mod signal_handler;

use clap::Parser;
use std::process::ExitCode;

pub use args::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    router::route(cli).await
}
