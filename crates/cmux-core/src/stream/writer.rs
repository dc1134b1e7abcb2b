//! Throttled, serialized partial writes for one session
//!
//! Writes are coalesced: inside the throttle window at most one deferred
//! flush is pending, and a new request replaces it. Every flush holds the
//! `in_flight` lock, so two writes for the same session never overlap.

use cmux_session::{Message, PartialStore, StorageResult, WorkspaceId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Default)]
struct WriterState {
    last_write: Option<Instant>,
    pending: Option<(u64, CancellationToken)>,
    next_timer: u64,
    closed: bool,
}

struct WriterInner {
    workspace_id: WorkspaceId,
    partials: Arc<PartialStore>,
    draft: Arc<Mutex<Message>>,
    interval: Duration,
    state: Mutex<WriterState>,
    in_flight: tokio::sync::Mutex<()>,
}

#[derive(Clone)]
pub(crate) struct PartialWriter {
    inner: Arc<WriterInner>,
}

impl PartialWriter {
    pub(crate) fn new(
        workspace_id: WorkspaceId,
        partials: Arc<PartialStore>,
        draft: Arc<Mutex<Message>>,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(WriterInner {
                workspace_id,
                partials,
                draft,
                interval,
                state: Mutex::new(WriterState::default()),
                in_flight: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Throttled write: flush now if the window has elapsed, otherwise make
    /// sure exactly one deferred flush fires at the end of the window.
    pub(crate) async fn schedule(&self) {
        let delay = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            let elapsed = state.last_write.map(|at| at.elapsed());
            match elapsed {
                Some(elapsed) if elapsed < self.inner.interval => {
                    Some(self.inner.interval - elapsed)
                }
                _ => {
                    if let Some((_, token)) = state.pending.take() {
                        token.cancel();
                    }
                    None
                }
            }
        };

        match delay {
            None => {
                if let Err(e) = self.flush().await {
                    warn!(workspace_id = %self.inner.workspace_id, "Partial write failed: {}", e);
                }
            }
            Some(delay) => self.defer(delay),
        }
    }

    fn defer(&self, delay: Duration) {
        let token = CancellationToken::new();
        let id = {
            let mut state = self.inner.state.lock();
            if let Some((_, previous)) = state.pending.take() {
                previous.cancel();
            }
            state.next_timer += 1;
            let id = state.next_timer;
            state.pending = Some((id, token.clone()));
            id
        };

        let writer = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    {
                        let mut state = writer.inner.state.lock();
                        if matches!(state.pending, Some((pending, _)) if pending == id) {
                            state.pending = None;
                        }
                    }
                    if let Err(e) = writer.flush().await {
                        warn!(
                            workspace_id = %writer.inner.workspace_id,
                            "Deferred partial write failed: {}", e
                        );
                    }
                }
            }
        });
    }

    /// Write the current draft immediately, unless the writer was closed
    pub(crate) async fn flush(&self) -> StorageResult<()> {
        self.write(false).await
    }

    /// Last write of a session; runs even after `close`
    pub(crate) async fn flush_final(&self) -> StorageResult<()> {
        self.write(true).await
    }

    /// Stop accepting throttled writes and drop any pending timer
    pub(crate) fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        if let Some((_, token)) = state.pending.take() {
            token.cancel();
        }
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.inner.state.lock().pending.is_some()
    }

    async fn write(&self, final_write: bool) -> StorageResult<()> {
        let _in_flight = self.inner.in_flight.lock().await;
        if !final_write && self.inner.state.lock().closed {
            return Ok(());
        }

        let snapshot = self.inner.draft.lock().clone();
        self.inner
            .partials
            .write(&self.inner.workspace_id, &snapshot)
            .await?;

        self.inner.state.lock().last_write = Some(Instant::now());
        debug!(
            workspace_id = %self.inner.workspace_id,
            message_id = %snapshot.id,
            parts = snapshot.parts.len(),
            final_write,
            "Flushed partial"
        );
        Ok(())
    }
}
