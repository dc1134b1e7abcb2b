//! End-to-end stream lifecycle scenarios driven through the public facade

mod common;

use async_trait::async_trait;
use cmux::{
    CommitOutcome, GenerateRequest, HistoryStore, Message, MessagePart, ModelAdapter, ModelEvent,
    ModelResponse, ProviderError, ScriptedAdapter, StreamErrorType, StreamEvent, StreamRequest,
    WorkspaceId,
};
use common::{ChannelAdapter, fixture, next_event, stream_config, wait_for, wait_idle};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn request(ws: &WorkspaceId, sequence: u64) -> StreamRequest {
    StreamRequest::new(ws.clone(), vec![Message::user("hi")], "test-model", sequence)
}

#[tokio::test]
async fn tool_only_turn_persists_completed_tool_part() {
    let adapter = ScriptedAdapter::new(vec![
        ModelEvent::Start,
        ModelEvent::tool_call("t1", "bash", json!({"script": "true"})),
        ModelEvent::tool_result("t1", "bash", json!({"exitCode": 0})),
        ModelEvent::finish(),
    ]);
    let mut f = fixture(Arc::new(adapter), stream_config(50));
    let ws = WorkspaceId::new("ws");

    f.manager.start_stream(request(&ws, 0)).await.unwrap();
    let end = wait_for(&mut f.events, "stream-end").await;
    wait_idle(&f.manager, &ws).await;

    let StreamEvent::StreamEnd { parts, .. } = end else {
        unreachable!()
    };
    assert_eq!(parts.len(), 1);

    let history = f.history.get_all(&ws).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(
        serde_json::to_value(&history[0].parts).unwrap(),
        json!([{
            "type": "dynamic-tool",
            "toolCallId": "t1",
            "toolName": "bash",
            "state": "output-available",
            "input": {"script": "true"},
            "output": {"exitCode": 0},
        }])
    );
    assert!(f.partials.read(&ws).await.is_none());
}

#[tokio::test]
async fn cancel_after_one_delta_leaves_committable_partial() {
    let adapter = Arc::new(ChannelAdapter::default());
    let tx = adapter.next_stream();
    let mut f = fixture(adapter, stream_config(10_000));
    let ws = WorkspaceId::new("ws");

    let message_id = f.manager.start_stream(request(&ws, 0)).await.unwrap();
    tx.send(ModelEvent::text("Hel")).unwrap();
    wait_for(&mut f.events, "stream-delta").await;

    assert!(f.manager.stop_stream(&ws).await);
    let abort = wait_for(&mut f.events, "stream-abort").await;
    assert_eq!(abort.message_id(), message_id);
    assert!(!f.manager.is_streaming(&ws));

    let partial = f.partials.read(&ws).await.expect("partial kept after stop");
    assert!(partial.is_partial());
    assert_eq!(partial.parts, vec![MessagePart::text("Hel")]);
    assert!(f.history.get_all(&ws).await.unwrap().is_empty());

    let outcome = f.partials.commit_to_history(&ws).await.unwrap();
    assert_eq!(outcome, CommitOutcome::Appended(0));

    let history = f.history.get_all(&ws).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, message_id);
    assert!(!history[0].is_partial());
    assert_eq!(history[0].text_content(), "Hel");
}

#[tokio::test]
async fn commit_without_partial_is_noop() {
    let f = fixture(Arc::new(ChannelAdapter::default()), stream_config(50));
    let ws = WorkspaceId::new("ws");

    let outcome = f.partials.commit_to_history(&ws).await.unwrap();
    assert_eq!(outcome, CommitOutcome::NoPartial);
    assert!(f.history.get_all(&ws).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_starts_abort_exactly_one() {
    let adapter = Arc::new(ChannelAdapter::default());
    let _tx1 = adapter.next_stream();
    let _tx2 = adapter.next_stream();
    let mut f = fixture(adapter, stream_config(50));
    let ws = WorkspaceId::new("ws");

    let (a, b) = tokio::join!(
        f.manager.start_stream(request(&ws, 0)),
        f.manager.start_stream(request(&ws, 1)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let first = next_event(&mut f.events).await;
    let abort = next_event(&mut f.events).await;
    let second = next_event(&mut f.events).await;

    assert_eq!(first.event_type(), "stream-start");
    assert_eq!(abort.event_type(), "stream-abort");
    assert_eq!(abort.message_id(), first.message_id());
    assert_eq!(second.event_type(), "stream-start");

    let mut started = vec![first.message_id().to_string(), second.message_id().to_string()];
    started.sort();
    let mut returned = vec![a, b];
    returned.sort();
    assert_eq!(started, returned);

    let info = f.manager.get_stream_info(&ws).unwrap();
    assert_eq!(info.message_id, second.message_id());

    f.manager.stop_stream(&ws).await;
    let last = wait_for(&mut f.events, "stream-abort").await;
    assert_eq!(last.message_id(), second.message_id());
    assert!(f.events.try_recv().is_err());
}

#[tokio::test]
async fn at_most_one_session_per_workspace() {
    let adapter = Arc::new(ChannelAdapter::default());
    let senders: Vec<_> = (0..4).map(|_| adapter.next_stream()).collect();
    let f = fixture(adapter, stream_config(50));
    let ws = WorkspaceId::new("ws");

    for sequence in 0..4 {
        f.manager.start_stream(request(&ws, sequence)).await.unwrap();
        assert_eq!(f.manager.active_workspaces(), vec![ws.clone()]);
    }
    assert_eq!(f.manager.get_stream_info(&ws).unwrap().history_sequence, 3);

    drop(senders);
    wait_idle(&f.manager, &ws).await;
    assert!(f.manager.active_workspaces().is_empty());
}

#[tokio::test]
async fn session_cleaned_up_after_error() {
    let adapter = Arc::new(ChannelAdapter::default());
    let tx = adapter.next_stream();
    let mut f = fixture(adapter, stream_config(50));
    let ws = WorkspaceId::new("ws");

    f.manager.start_stream(request(&ws, 0)).await.unwrap();
    tx.send(ModelEvent::text("partial answer")).unwrap();
    tx.send(ModelEvent::Error {
        error: ProviderError::new("upstream overloaded").with_status(503),
    })
    .unwrap();

    let event = wait_for(&mut f.events, "error").await;
    let StreamEvent::Error { error_type, .. } = event else {
        unreachable!()
    };
    assert_eq!(error_type, StreamErrorType::ServerError);
    wait_idle(&f.manager, &ws).await;
    assert!(!f.manager.is_streaming(&ws));

    // errored partials are dropped, history untouched
    let partial = f.partials.read(&ws).await.unwrap();
    assert!(partial.is_errored());
    let outcome = f.partials.commit_to_history(&ws).await.unwrap();
    assert_eq!(outcome, CommitOutcome::DiscardedErrored);
    assert!(f.history.get_all(&ws).await.unwrap().is_empty());
}

struct PanickingAdapter;

#[async_trait]
impl ModelAdapter for PanickingAdapter {
    async fn generate(&self, _request: GenerateRequest) -> Result<ModelResponse, ProviderError> {
        let mut sent = false;
        let events = futures::stream::poll_fn(move |_| {
            if sent {
                panic!("model stream exploded");
            }
            sent = true;
            std::task::Poll::Ready(Some(ModelEvent::text("before the crash")))
        });
        Ok(ModelResponse::new(events.boxed()))
    }
}

#[tokio::test]
async fn session_cleaned_up_after_panic() {
    let mut f = fixture(Arc::new(PanickingAdapter), stream_config(50));
    let ws = WorkspaceId::new("ws");

    f.manager.start_stream(request(&ws, 0)).await.unwrap();
    wait_for(&mut f.events, "stream-delta").await;
    wait_idle(&f.manager, &ws).await;
    assert!(!f.manager.is_streaming(&ws));

    // the workspace accepts a new stream afterwards
    f.manager.start_stream(request(&ws, 1)).await.unwrap();
    wait_idle(&f.manager, &ws).await;
}

#[tokio::test]
async fn no_partial_write_lands_after_stop_and_delete() {
    let adapter = Arc::new(ChannelAdapter::default());
    let tx = adapter.next_stream();
    let mut f = fixture(adapter, stream_config(50));
    let ws = WorkspaceId::new("ws");

    f.manager.start_stream(request(&ws, 0)).await.unwrap();
    for chunk in ["a", "b", "c"] {
        tx.send(ModelEvent::text(chunk)).unwrap();
        wait_for(&mut f.events, "stream-delta").await;
    }

    f.manager.stop_stream(&ws).await;
    assert_eq!(f.partials.read(&ws).await.unwrap().parts.len(), 3);

    f.partials.delete(&ws).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(f.partials.read(&ws).await.is_none());
}

#[tokio::test]
async fn tool_result_completes_part_without_growing_message() {
    let adapter = Arc::new(ChannelAdapter::default());
    let tx = adapter.next_stream();
    let mut f = fixture(adapter, stream_config(50));
    let ws = WorkspaceId::new("ws");

    f.manager.start_stream(request(&ws, 0)).await.unwrap();
    tx.send(ModelEvent::text("running")).unwrap();
    tx.send(ModelEvent::tool_call("t1", "bash", json!({"script": "ls"})))
        .unwrap();
    wait_for(&mut f.events, "tool-call-start").await;
    assert_eq!(f.manager.get_stream_info(&ws).unwrap().parts.len(), 2);

    tx.send(ModelEvent::tool_result("t1", "bash", json!("first")))
        .unwrap();
    wait_for(&mut f.events, "tool-call-end").await;
    tx.send(ModelEvent::tool_result("t1", "bash", json!("second")))
        .unwrap();
    wait_for(&mut f.events, "tool-call-end").await;

    let parts = f.manager.get_stream_info(&ws).unwrap().parts;
    assert_eq!(parts.len(), 2);
    let MessagePart::DynamicTool { output, .. } = &parts[1] else {
        panic!("expected tool part, got {:?}", parts[1]);
    };
    assert_eq!(output.as_ref(), Some(&json!("first")));

    tx.send(ModelEvent::finish()).unwrap();
    wait_for(&mut f.events, "stream-end").await;
    wait_idle(&f.manager, &ws).await;
    assert_eq!(f.history.get_all(&ws).await.unwrap()[0].parts.len(), 2);
}
