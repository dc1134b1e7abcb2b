//! Shared fixtures for the end-to-end tests

#![allow(dead_code)]

use async_trait::async_trait;
use cmux::{
    EventBus, GenerateRequest, JsonlHistoryStore, KeyedMutex, ModelAdapter, ModelEvent,
    ModelResponse, PartialStore, ProviderError, SessionPaths, StreamConfig, StreamEvent,
    StreamManager, WorkspaceEvent, WorkspaceId,
};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

/// Adapter whose events are pushed by the test through a channel, one
/// channel per `generate` call
#[derive(Default)]
pub struct ChannelAdapter {
    pending: Mutex<VecDeque<mpsc::UnboundedReceiver<ModelEvent>>>,
}

impl ChannelAdapter {
    /// Prepare the next generation and return its event sender
    pub fn next_stream(&self) -> mpsc::UnboundedSender<ModelEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.lock().push_back(rx);
        tx
    }
}

#[async_trait]
impl ModelAdapter for ChannelAdapter {
    async fn generate(&self, _request: GenerateRequest) -> Result<ModelResponse, ProviderError> {
        let rx = self
            .pending
            .lock()
            .pop_front()
            .ok_or_else(|| ProviderError::new("no stream prepared").with_status(500))?;
        let events = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(ModelResponse::new(events.boxed()))
    }
}

pub struct Fixture {
    pub manager: StreamManager,
    pub history: Arc<JsonlHistoryStore>,
    pub partials: Arc<PartialStore>,
    pub events: broadcast::Receiver<WorkspaceEvent>,
    pub temp: TempDir,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("cmux_core=debug,cmux_session=debug")
        .with_test_writer()
        .try_init();
}

pub fn stream_config(interval_ms: u64) -> StreamConfig {
    StreamConfig {
        partial_write_interval_ms: interval_ms,
        usage_timeout_ms: 100,
        ..StreamConfig::default()
    }
}

pub fn fixture(adapter: Arc<dyn ModelAdapter>, config: StreamConfig) -> Fixture {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let paths = SessionPaths::new(temp.path());
    let locks = KeyedMutex::new();
    let history = Arc::new(JsonlHistoryStore::with_locks(paths.clone(), locks.clone()));
    let partials = Arc::new(PartialStore::new(paths, history.clone(), locks));
    let bus = EventBus::new(1024);
    let events = bus.subscribe();
    let manager = StreamManager::new(adapter, partials.clone(), bus, config);
    Fixture {
        manager,
        history,
        partials,
        events,
        temp,
    }
}

pub async fn next_event(rx: &mut broadcast::Receiver<WorkspaceEvent>) -> StreamEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
        .event
}

pub async fn wait_for(
    rx: &mut broadcast::Receiver<WorkspaceEvent>,
    event_type: &str,
) -> StreamEvent {
    loop {
        let event = next_event(rx).await;
        if event.event_type() == event_type {
            return event;
        }
    }
}

pub async fn wait_idle(manager: &StreamManager, workspace_id: &WorkspaceId) {
    tokio::time::timeout(Duration::from_secs(5), manager.wait_idle(workspace_id))
        .await
        .expect("session was never cleaned up");
}
