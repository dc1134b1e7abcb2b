//! Partial message persistence
//!
//! A workspace has at most one `partial.json`: the latest snapshot of the
//! assistant message that is being generated, or that was interrupted before
//! it could be finalized. It is the crash-recovery source for in-flight turns
//! and is folded into history by [`PartialStore::commit_to_history`].

use crate::lock::KeyedMutex;
use crate::paths::{SessionPaths, write_atomic};
use crate::storage::{HistoryStore, StorageError, StorageResult};
use crate::{Message, WorkspaceId};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What `commit_to_history` did with the partial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// No partial existed
    NoPartial,
    /// The partial carried an error and was dropped
    DiscardedErrored,
    /// No message existed at the sequence; the partial was appended
    Appended(u64),
    /// The stored message had fewer parts; it was replaced
    Updated(u64),
    /// History already held an equal or newer version
    Stale(u64),
}

/// Single-slot store for in-progress assistant messages
pub struct PartialStore {
    paths: SessionPaths,
    locks: KeyedMutex,
    history: Arc<dyn HistoryStore>,
}

impl PartialStore {
    /// `locks` should be the same table the history store uses so that the
    /// two never write a workspace concurrently.
    pub fn new(paths: SessionPaths, history: Arc<dyn HistoryStore>, locks: KeyedMutex) -> Self {
        Self {
            paths,
            locks,
            history,
        }
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    /// Load the partial for a workspace. Unreadable partials count as absent.
    pub async fn read(&self, workspace_id: &WorkspaceId) -> Option<Message> {
        let path = self.paths.partial_path(workspace_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(workspace_id = %workspace_id, "Failed to read partial: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<Message>(&content) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(workspace_id = %workspace_id, "Failed to parse partial: {}", e);
                None
            }
        }
    }

    /// Overwrite the partial slot. The stored copy always has `partial: true`.
    pub async fn write(&self, workspace_id: &WorkspaceId, message: &Message) -> StorageResult<()> {
        let mut snapshot = message.clone();
        snapshot.metadata.partial = true;
        let json = serde_json::to_vec_pretty(&snapshot)?;

        let _guard = self.locks.acquire(workspace_id).await;
        write_atomic(&self.paths.partial_path(workspace_id), &json).await?;

        debug!(
            workspace_id = %workspace_id,
            message_id = %snapshot.id,
            parts = snapshot.parts.len(),
            "Wrote partial"
        );
        Ok(())
    }

    /// Remove the partial slot; a missing slot is not an error
    pub async fn delete(&self, workspace_id: &WorkspaceId) -> StorageResult<()> {
        let _guard = self.locks.acquire(workspace_id).await;

        match tokio::fs::remove_file(self.paths.partial_path(workspace_id)).await {
            Ok(()) => {
                debug!(workspace_id = %workspace_id, "Deleted partial");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Fold the partial into history and remove it.
    ///
    /// Safe to call repeatedly: once the partial is gone, further calls are
    /// no-ops. Errored partials are deleted without touching history.
    pub async fn commit_to_history(&self, workspace_id: &WorkspaceId) -> StorageResult<CommitOutcome> {
        let Some(partial) = self.read(workspace_id).await else {
            return Ok(CommitOutcome::NoPartial);
        };

        if partial.is_errored() {
            self.delete(workspace_id).await?;
            info!(
                workspace_id = %workspace_id,
                message_id = %partial.id,
                error_type = ?partial.metadata.error_type,
                "Discarded errored partial"
            );
            return Ok(CommitOutcome::DiscardedErrored);
        }

        let sequence = partial
            .history_sequence()
            .ok_or_else(|| StorageError::MissingSequence(partial.id.clone()))?;

        let existing = self.history.get_by_sequence(workspace_id, sequence).await?;

        let mut committed = partial;
        committed.metadata.partial = false;

        let outcome = match existing {
            None => {
                self.history.append(workspace_id, committed).await?;
                CommitOutcome::Appended(sequence)
            }
            Some(stored) if stored.parts.len() < committed.parts.len() => {
                self.history.update(workspace_id, &committed).await?;
                CommitOutcome::Updated(sequence)
            }
            Some(_) => CommitOutcome::Stale(sequence),
        };

        self.delete(workspace_id).await?;
        info!(
            workspace_id = %workspace_id,
            history_sequence = sequence,
            outcome = ?outcome,
            "Committed partial to history"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::JsonlHistoryStore;
    use crate::{MessagePart, StreamErrorType};
    use tempfile::TempDir;

    struct Fixture {
        partials: PartialStore,
        history: Arc<JsonlHistoryStore>,
        _temp: TempDir,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let paths = SessionPaths::new(temp.path());
        let locks = KeyedMutex::new();
        let history = Arc::new(JsonlHistoryStore::with_locks(paths.clone(), locks.clone()));
        let partials = PartialStore::new(paths, history.clone(), locks);
        Fixture {
            partials,
            history,
            _temp: temp,
        }
    }

    fn draft(sequence: u64, parts: Vec<MessagePart>) -> Message {
        let mut message = Message::assistant_placeholder("assistant-1", "m").with_parts(parts);
        message.metadata.history_sequence = Some(sequence);
        message
    }

    #[tokio::test]
    async fn test_write_forces_partial_flag() {
        let f = fixture();
        let ws = WorkspaceId::new("ws");

        f.partials
            .write(&ws, &draft(0, vec![MessagePart::text("a")]))
            .await
            .unwrap();

        let stored = f.partials.read(&ws).await.unwrap();
        assert!(stored.is_partial());
        assert_eq!(stored.parts.len(), 1);
    }

    #[tokio::test]
    async fn test_read_missing_or_corrupt_is_none() {
        let f = fixture();
        let ws = WorkspaceId::new("ws");
        assert!(f.partials.read(&ws).await.is_none());

        let path = f.history.paths().partial_path(&ws);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, "{ truncated").await.unwrap();
        assert!(f.partials.read(&ws).await.is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let f = fixture();
        let ws = WorkspaceId::new("ws");
        f.partials.delete(&ws).await.unwrap();
        f.partials.write(&ws, &draft(0, vec![])).await.unwrap();
        f.partials.delete(&ws).await.unwrap();
        f.partials.delete(&ws).await.unwrap();
        assert!(f.partials.read(&ws).await.is_none());
    }

    #[tokio::test]
    async fn test_commit_without_partial() {
        let f = fixture();
        let ws = WorkspaceId::new("ws");
        let outcome = f.partials.commit_to_history(&ws).await.unwrap();
        assert_eq!(outcome, CommitOutcome::NoPartial);
        assert!(f.history.get_all(&ws).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_appends_when_sequence_absent() {
        let f = fixture();
        let ws = WorkspaceId::new("ws");

        f.partials
            .write(&ws, &draft(0, vec![MessagePart::text("hello")]))
            .await
            .unwrap();
        let outcome = f.partials.commit_to_history(&ws).await.unwrap();

        assert_eq!(outcome, CommitOutcome::Appended(0));
        let all = f.history.get_all(&ws).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(!all[0].is_partial());
        assert!(f.partials.read(&ws).await.is_none());
    }

    #[tokio::test]
    async fn test_commit_updates_placeholder_with_more_parts() {
        let f = fixture();
        let ws = WorkspaceId::new("ws");

        let seq = f
            .history
            .append(&ws, Message::assistant_placeholder("assistant-1", "m"))
            .await
            .unwrap();
        f.partials
            .write(&ws, &draft(seq, vec![MessagePart::text("partial text")]))
            .await
            .unwrap();

        let outcome = f.partials.commit_to_history(&ws).await.unwrap();
        assert_eq!(outcome, CommitOutcome::Updated(seq));

        let all = f.history.get_all(&ws).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].text_content(), "partial text");
    }

    #[tokio::test]
    async fn test_commit_skips_stale_partial_but_deletes_it() {
        let f = fixture();
        let ws = WorkspaceId::new("ws");

        let finalized = draft(0, vec![MessagePart::text("a"), MessagePart::text("b")]);
        f.history.append(&ws, finalized).await.unwrap();
        f.partials
            .write(&ws, &draft(0, vec![MessagePart::text("a")]))
            .await
            .unwrap();

        let outcome = f.partials.commit_to_history(&ws).await.unwrap();
        assert_eq!(outcome, CommitOutcome::Stale(0));
        assert_eq!(f.history.get_all(&ws).await.unwrap()[0].parts.len(), 2);
        assert!(f.partials.read(&ws).await.is_none());
    }

    #[tokio::test]
    async fn test_commit_is_idempotent() {
        let f = fixture();
        let ws = WorkspaceId::new("ws");

        f.partials
            .write(&ws, &draft(0, vec![MessagePart::text("x")]))
            .await
            .unwrap();

        f.partials.commit_to_history(&ws).await.unwrap();
        let after_first = f.history.get_all(&ws).await.unwrap();

        let second = f.partials.commit_to_history(&ws).await.unwrap();
        let after_second = f.history.get_all(&ws).await.unwrap();

        assert_eq!(second, CommitOutcome::NoPartial);
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn test_errored_partial_never_reaches_history() {
        let f = fixture();
        let ws = WorkspaceId::new("ws");

        let mut errored = draft(0, vec![MessagePart::text("half an answer")]);
        errored.metadata.error = Some("overloaded".to_string());
        errored.metadata.error_type = Some(StreamErrorType::ServerError);
        f.partials.write(&ws, &errored).await.unwrap();

        let outcome = f.partials.commit_to_history(&ws).await.unwrap();
        assert_eq!(outcome, CommitOutcome::DiscardedErrored);
        assert!(f.history.get_all(&ws).await.unwrap().is_empty());
        assert!(f.partials.read(&ws).await.is_none());
    }

    #[tokio::test]
    async fn test_commit_requires_sequence() {
        let f = fixture();
        let ws = WorkspaceId::new("ws");

        let unsequenced = Message::assistant_placeholder("assistant-1", "m")
            .with_parts(vec![MessagePart::text("x")]);
        f.partials.write(&ws, &unsequenced).await.unwrap();

        let result = f.partials.commit_to_history(&ws).await;
        assert!(matches!(result, Err(StorageError::MissingSequence(_))));
    }
}
