//! Conversation persistence for cmux workspaces
//!
//! This crate provides:
//! - The message data model shared by every layer
//! - A per-key async mutex used to serialize workspace writers
//! - The append-only, sequence-numbered history log
//! - The single-slot partial store used for crash recovery

pub mod lock;
pub mod message;
pub mod partial;
pub mod paths;
pub mod storage;

pub use lock::{KeyedGuard, KeyedMutex};
pub use message::{
    LanguageModelUsage, Message, MessageMetadata, MessagePart, Role, StreamErrorType,
    ToolPartState, WorkspaceId, new_message_id,
};
pub use partial::{CommitOutcome, PartialStore};
pub use paths::SessionPaths;
pub use storage::{HistoryStore, JsonlHistoryStore, StorageError, StorageResult};
