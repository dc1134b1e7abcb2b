//! History storage abstraction and implementations
//!
//! Provides the trait-based, append-only conversation log with a JSONL
//! filesystem implementation.

mod history;

pub use history::JsonlHistoryStore;

use crate::{Message, WorkspaceId};
use async_trait::async_trait;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("History sequence {sequence} already exists in workspace {workspace_id}")]
    DuplicateSequence {
        workspace_id: WorkspaceId,
        sequence: u64,
    },

    #[error("Message {0} has no history sequence")]
    MissingSequence(String),

    #[error("Storage path not available")]
    PathUnavailable,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable, sequence-numbered conversation log for each workspace
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a message and return its history sequence.
    ///
    /// A message that already carries a sequence keeps it; otherwise the next
    /// free sequence for the workspace is assigned.
    async fn append(&self, workspace_id: &WorkspaceId, message: Message) -> StorageResult<u64>;

    /// Replace the stored message that has the same history sequence
    async fn update(&self, workspace_id: &WorkspaceId, message: &Message) -> StorageResult<()>;

    /// All messages in sequence order
    async fn get_all(&self, workspace_id: &WorkspaceId) -> StorageResult<Vec<Message>>;

    /// Remove the message with `message_id` and every message after it.
    /// Returns the number of removed messages.
    async fn truncate_after(
        &self,
        workspace_id: &WorkspaceId,
        message_id: &str,
    ) -> StorageResult<usize>;

    /// Drop the whole conversation for a workspace
    async fn clear(&self, workspace_id: &WorkspaceId) -> StorageResult<()>;

    /// Look up the message stored at `sequence`
    async fn get_by_sequence(
        &self,
        workspace_id: &WorkspaceId,
        sequence: u64,
    ) -> StorageResult<Option<Message>> {
        Ok(self
            .get_all(workspace_id)
            .await?
            .into_iter()
            .find(|m| m.history_sequence() == Some(sequence)))
    }
}
