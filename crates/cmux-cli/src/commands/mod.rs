//! CLI commands

pub mod history;
pub mod run;

pub use run::RunOptions;
