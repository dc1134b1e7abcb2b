//! On-disk layout of workspace session data
//!
//! ```text
//! <root>/
//!   <workspaceId>/
//!     chat.jsonl     finalized messages, one per line
//!     partial.json   in-progress assistant message, if any
//! ```

use crate::storage::{StorageError, StorageResult};
use crate::WorkspaceId;
use std::path::{Path, PathBuf};

const CHAT_FILE: &str = "chat.jsonl";
const PARTIAL_FILE: &str = "partial.json";

#[derive(Debug, Clone)]
pub struct SessionPaths {
    root: PathBuf,
}

impl SessionPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default layout under `~/.cmux/sessions`
    pub fn default_root() -> StorageResult<Self> {
        let root = dirs::home_dir()
            .ok_or(StorageError::PathUnavailable)?
            .join(".cmux")
            .join("sessions");
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workspace_dir(&self, workspace_id: &WorkspaceId) -> PathBuf {
        self.root.join(workspace_id.as_str())
    }

    pub fn chat_path(&self, workspace_id: &WorkspaceId) -> PathBuf {
        self.workspace_dir(workspace_id).join(CHAT_FILE)
    }

    pub fn partial_path(&self, workspace_id: &WorkspaceId) -> PathBuf {
        self.workspace_dir(workspace_id).join(PARTIAL_FILE)
    }
}

/// Write `contents` to `path` via a sibling temp file and rename
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| StorageError::InvalidData(format!("not a file path: {:?}", path)))?;
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

    tokio::fs::write(&tmp, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
