//! cmux
//!
//! Streaming session lifecycle and crash-safe conversation persistence for
//! coding-agent workspaces. This crate re-exports the workspace members:
//! - `cmux_session`: message model, keyed mutex, history and partial stores
//! - `cmux_core`: errors, configuration, event bus, model adapters, the
//!   stream manager and the AI service

pub use cmux_core::*;

pub use cmux_core::cmux_session::{
    CommitOutcome, HistoryStore, JsonlHistoryStore, KeyedMutex, LanguageModelUsage, Message,
    MessageMetadata, MessagePart, PartialStore, Role, SessionPaths, StorageError,
    StreamErrorType, ToolPartState, WorkspaceId,
};
