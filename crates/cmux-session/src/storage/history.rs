//! JSONL history storage
//!
//! Each workspace keeps its conversation in `chat.jsonl`, one message per
//! line. Appends are plain line appends; updates and truncations rewrite the
//! file through a temp file and rename. All mutations for a workspace run
//! under the shared per-workspace file lock.

use super::{HistoryStore, StorageError, StorageResult};
use crate::lock::KeyedMutex;
use crate::paths::{SessionPaths, write_atomic};
use crate::{Message, WorkspaceId};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// JSONL-backed history store
pub struct JsonlHistoryStore {
    paths: SessionPaths,
    locks: KeyedMutex,
    /// Next sequence to hand out, per workspace. Never rewound.
    sequences: DashMap<WorkspaceId, u64>,
}

impl JsonlHistoryStore {
    pub fn new(paths: SessionPaths) -> Self {
        Self::with_locks(paths, KeyedMutex::new())
    }

    /// Create a store sharing its file locks with other per-workspace writers
    pub fn with_locks(paths: SessionPaths, locks: KeyedMutex) -> Self {
        Self {
            paths,
            locks,
            sequences: DashMap::new(),
        }
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    async fn read_messages(&self, workspace_id: &WorkspaceId) -> StorageResult<Vec<Message>> {
        let path = self.paths.chat_path(workspace_id);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }

        let file = File::open(&path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut messages = Vec::new();
        let mut line_number = 0usize;

        while let Some(line) = lines.next_line().await? {
            line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(&line) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    warn!(
                        workspace_id = %workspace_id,
                        line = line_number,
                        "Skipping malformed history line: {}",
                        e
                    );
                }
            }
        }

        Ok(messages)
    }

    async fn rewrite(&self, workspace_id: &WorkspaceId, messages: &[Message]) -> StorageResult<()> {
        let mut contents = String::new();
        for message in messages {
            contents.push_str(&serde_json::to_string(message)?);
            contents.push('\n');
        }
        write_atomic(&self.paths.chat_path(workspace_id), contents.as_bytes()).await
    }

    /// Next free sequence; loads the counter from disk on first use
    async fn next_sequence(&self, workspace_id: &WorkspaceId) -> StorageResult<u64> {
        if let Some(next) = self.sequences.get(workspace_id) {
            return Ok(*next);
        }

        let next = self
            .read_messages(workspace_id)
            .await?
            .iter()
            .filter_map(|m| m.history_sequence())
            .max()
            .map(|max| max + 1)
            .unwrap_or(0);
        self.sequences.insert(workspace_id.clone(), next);
        Ok(next)
    }
}

#[async_trait]
impl HistoryStore for JsonlHistoryStore {
    async fn append(&self, workspace_id: &WorkspaceId, mut message: Message) -> StorageResult<u64> {
        let _guard = self.locks.acquire(workspace_id).await;

        let next = self.next_sequence(workspace_id).await?;
        let sequence = match message.history_sequence() {
            Some(existing) => {
                if existing < next {
                    let taken = self
                        .read_messages(workspace_id)
                        .await?
                        .iter()
                        .any(|m| m.history_sequence() == Some(existing));
                    if taken {
                        return Err(StorageError::DuplicateSequence {
                            workspace_id: workspace_id.clone(),
                            sequence: existing,
                        });
                    }
                }
                existing
            }
            None => next,
        };
        message.metadata.history_sequence = Some(sequence);

        let path = self.paths.chat_path(workspace_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(&message)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        self.sequences
            .insert(workspace_id.clone(), next.max(sequence + 1));

        debug!(
            workspace_id = %workspace_id,
            message_id = %message.id,
            history_sequence = sequence,
            "Appended message to history"
        );
        Ok(sequence)
    }

    async fn update(&self, workspace_id: &WorkspaceId, message: &Message) -> StorageResult<()> {
        let sequence = message
            .history_sequence()
            .ok_or_else(|| StorageError::MissingSequence(message.id.clone()))?;

        let _guard = self.locks.acquire(workspace_id).await;

        let mut messages = self.read_messages(workspace_id).await?;
        let slot = messages
            .iter_mut()
            .find(|m| m.history_sequence() == Some(sequence))
            .ok_or_else(|| {
                StorageError::NotFound(format!(
                    "history sequence {} in workspace {}",
                    sequence, workspace_id
                ))
            })?;
        *slot = message.clone();

        self.rewrite(workspace_id, &messages).await?;
        debug!(
            workspace_id = %workspace_id,
            message_id = %message.id,
            history_sequence = sequence,
            "Updated history message"
        );
        Ok(())
    }

    async fn get_all(&self, workspace_id: &WorkspaceId) -> StorageResult<Vec<Message>> {
        let mut messages = self.read_messages(workspace_id).await?;
        messages.sort_by_key(|m| m.history_sequence().unwrap_or(u64::MAX));
        Ok(messages)
    }

    async fn truncate_after(
        &self,
        workspace_id: &WorkspaceId,
        message_id: &str,
    ) -> StorageResult<usize> {
        let _guard = self.locks.acquire(workspace_id).await;

        // Lines appended with an earlier sequence sit at the end of the file
        let mut messages = self.read_messages(workspace_id).await?;
        messages.sort_by_key(|m| m.history_sequence().unwrap_or(u64::MAX));
        let index = messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| StorageError::NotFound(format!("message {}", message_id)))?;

        let removed = messages.len() - index;
        messages.truncate(index);
        self.rewrite(workspace_id, &messages).await?;

        info!(
            workspace_id = %workspace_id,
            message_id = %message_id,
            removed,
            "Truncated history"
        );
        Ok(removed)
    }

    async fn clear(&self, workspace_id: &WorkspaceId) -> StorageResult<()> {
        let _guard = self.locks.acquire(workspace_id).await;

        let path = self.paths.chat_path(workspace_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(workspace_id = %workspace_id, "Cleared history");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessagePart;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store() -> (JsonlHistoryStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonlHistoryStore::new(SessionPaths::new(temp_dir.path()));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_sequences() {
        let (store, _temp) = create_test_store();
        let ws = WorkspaceId::new("ws");

        for expected in 0..3 {
            let seq = store.append(&ws, Message::user("hi")).await.unwrap();
            assert_eq!(seq, expected);
        }

        let all = store.get_all(&ws).await.unwrap();
        let seqs: Vec<_> = all.iter().map(|m| m.history_sequence()).collect();
        assert_eq!(seqs, vec![Some(0), Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn test_append_preserves_existing_sequence() {
        let (store, _temp) = create_test_store();
        let ws = WorkspaceId::new("ws");

        let mut message = Message::assistant_placeholder("a1", "m");
        message.metadata.history_sequence = Some(5);
        assert_eq!(store.append(&ws, message).await.unwrap(), 5);

        // Counter moved past the preserved sequence
        assert_eq!(store.append(&ws, Message::user("next")).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_duplicate_sequence_rejected() {
        let (store, _temp) = create_test_store();
        let ws = WorkspaceId::new("ws");

        store.append(&ws, Message::user("first")).await.unwrap();

        let mut dup = Message::user("dup");
        dup.metadata.history_sequence = Some(0);
        let result = store.append(&ws, dup).await;
        assert!(matches!(
            result,
            Err(StorageError::DuplicateSequence { sequence: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_appends_get_unique_sequences() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(JsonlHistoryStore::new(SessionPaths::new(temp.path())));
        let ws = WorkspaceId::new("ws");

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                let ws = ws.clone();
                tokio::spawn(async move {
                    store
                        .append(&ws, Message::user(format!("m{}", i)))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut seqs = Vec::new();
        for handle in handles {
            seqs.push(handle.await.unwrap());
        }
        seqs.sort_unstable();
        assert_eq!(seqs, (0..16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_update_replaces_in_place() {
        let (store, _temp) = create_test_store();
        let ws = WorkspaceId::new("ws");

        store.append(&ws, Message::user("q")).await.unwrap();
        let seq = store
            .append(&ws, Message::assistant_placeholder("a1", "m"))
            .await
            .unwrap();

        let mut updated = store.get_by_sequence(&ws, seq).await.unwrap().unwrap();
        updated.parts.push(MessagePart::text("answer"));
        store.update(&ws, &updated).await.unwrap();

        let all = store.get_all(&ws).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].text_content(), "answer");
    }

    #[tokio::test]
    async fn test_update_unknown_sequence() {
        let (store, _temp) = create_test_store();
        let ws = WorkspaceId::new("ws");

        let mut message = Message::user("x");
        message.metadata.history_sequence = Some(42);
        assert!(matches!(
            store.update(&ws, &message).await,
            Err(StorageError::NotFound(_))
        ));

        let unsequenced = Message::user("y");
        assert!(matches!(
            store.update(&ws, &unsequenced).await,
            Err(StorageError::MissingSequence(_))
        ));
    }

    #[tokio::test]
    async fn test_truncate_after_removes_message_and_tail() {
        let (store, _temp) = create_test_store();
        let ws = WorkspaceId::new("ws");

        let first = Message::user("one");
        let second = Message::user("two");
        let second_id = second.id.clone();
        store.append(&ws, first).await.unwrap();
        store.append(&ws, second).await.unwrap();
        store.append(&ws, Message::user("three")).await.unwrap();

        let removed = store.truncate_after(&ws, &second_id).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.get_all(&ws).await.unwrap().len(), 1);

        // Truncated sequences are not handed out again
        assert_eq!(store.append(&ws, Message::user("four")).await.unwrap(), 3);

        assert!(matches!(
            store.truncate_after(&ws, "missing").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_truncate_follows_sequence_order() {
        let (store, _temp) = create_test_store();
        let ws = WorkspaceId::new("ws");

        // seq 0 and 2 first, then a late line carrying seq 1
        let user = Message::user("one");
        store.append(&ws, user).await.unwrap();
        let mut late_reply = Message::assistant_placeholder("assistant-1", "m")
            .with_parts(vec![MessagePart::text("reply")]);
        late_reply.metadata.history_sequence = Some(1);
        let mut next_user = Message::user("two");
        next_user.metadata.history_sequence = Some(2);
        let next_id = next_user.id.clone();
        store.append(&ws, next_user).await.unwrap();
        store.append(&ws, late_reply).await.unwrap();

        let removed = store.truncate_after(&ws, &next_id).await.unwrap();
        assert_eq!(removed, 1);

        let remaining = store.get_all(&ws).await.unwrap();
        let sequences: Vec<_> = remaining.iter().filter_map(|m| m.history_sequence()).collect();
        assert_eq!(sequences, vec![0, 1]);
        assert_eq!(remaining[1].id, "assistant-1");
    }

    #[tokio::test]
    async fn test_clear() {
        let (store, _temp) = create_test_store();
        let ws = WorkspaceId::new("ws");

        store.append(&ws, Message::user("one")).await.unwrap();
        store.clear(&ws).await.unwrap();
        assert!(store.get_all(&ws).await.unwrap().is_empty());

        // Idempotent
        store.clear(&ws).await.unwrap();
    }

    #[tokio::test]
    async fn test_counter_recovered_from_disk() {
        let temp = TempDir::new().unwrap();
        let ws = WorkspaceId::new("ws");

        {
            let store = JsonlHistoryStore::new(SessionPaths::new(temp.path()));
            store.append(&ws, Message::user("one")).await.unwrap();
            store.append(&ws, Message::user("two")).await.unwrap();
        }

        let reopened = JsonlHistoryStore::new(SessionPaths::new(temp.path()));
        assert_eq!(reopened.append(&ws, Message::user("three")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_malformed_lines_skipped() {
        let (store, _temp) = create_test_store();
        let ws = WorkspaceId::new("ws");

        store.append(&ws, Message::user("ok")).await.unwrap();
        let path = store.paths().chat_path(&ws);
        let mut contents = tokio::fs::read_to_string(&path).await.unwrap();
        contents.push_str("{not json\n");
        tokio::fs::write(&path, contents).await.unwrap();

        let all = store.get_all(&ws).await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
