//! Execution monitoring and reconnection over the mock engine's socket.
//!
//! Like `probe_tests`, these exercise `ffgo-comfyui` and sit next to the
//! shared mock engine. One test also checks the pipeline's mapping of
//! monitor errors.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tokio_tungstenite::tungstenite::Message;

use ffgo_comfyui::monitor::{ExecutionMonitor, MonitorError};
use ffgo_comfyui::reconnect::{ReconnectConfig, ReconnectError};
use ffgo_pipeline::PipelineError;

use common::{execution_error, executing, progress, MockEngine, WsAction};

fn reconnect_config(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        max_attempts,
        delay: Duration::from_millis(10),
    }
}

// ---------------------------------------------------------------------------
// Terminal events
// ---------------------------------------------------------------------------

/// Completion is detected on the second frame and nothing after it is read.
#[tokio::test]
async fn completes_after_exactly_two_frames() {
    let engine = MockEngine::start().await;
    engine.state.script_session(vec![
        executing(Some("17"), "X"),
        executing(None, "X"),
        progress(1, 10, "X"),
        WsAction::Hold,
    ]);
    let (client, api) = (engine.client(), engine.api());
    let mut conn = client.connect("session-1").await.unwrap();

    let monitor = ExecutionMonitor::new(&client, &api, reconnect_config(3));
    monitor
        .wait_for_completion(&mut conn, "X", &CancellationToken::new())
        .await
        .unwrap();

    // The third frame is still waiting on the socket.
    let next = conn.ws_stream.next().await;
    assert_matches!(next, Some(Ok(Message::Text(text))) if text.contains("progress"));
    conn.close().await;
}

/// Events for other prompts and progress frames do not end monitoring.
#[tokio::test]
async fn other_prompts_are_ignored() {
    let engine = MockEngine::start().await;
    engine.state.script_session(vec![
        executing(None, "Y"),
        execution_error("Y", "not mine"),
        WsAction::Send(r#"{"type":"status","data":{"status":{}}}"#.into()),
        progress(5, 10, "X"),
        executing(None, "X"),
        WsAction::Hold,
    ]);
    let (client, api) = (engine.client(), engine.api());
    let mut conn = client.connect("session-1").await.unwrap();

    let result = ExecutionMonitor::new(&client, &api, reconnect_config(3))
        .wait_for_completion(&mut conn, "X", &CancellationToken::new())
        .await;

    assert_matches!(result, Ok(()));
}

/// An engine-reported exception carries its message.
#[tokio::test]
async fn execution_error_carries_message() {
    let engine = MockEngine::start().await;
    engine
        .state
        .script_session(vec![execution_error("X", "boom"), WsAction::Hold]);
    let (client, api) = (engine.client(), engine.api());
    let mut conn = client.connect("session-1").await.unwrap();

    let result = ExecutionMonitor::new(&client, &api, reconnect_config(3))
        .wait_for_completion(&mut conn, "X", &CancellationToken::new())
        .await;

    assert_matches!(result, Err(MonitorError::ExecutionFailed(msg)) if msg == "boom");
}

/// Cancelling the token ends a monitor that would otherwise wait forever.
#[tokio::test]
async fn cancellation_stops_monitoring() {
    let engine = MockEngine::start().await;
    engine.state.script_session(vec![WsAction::Hold]);
    let (client, api) = (engine.client(), engine.api());
    let mut conn = client.connect("session-1").await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = ExecutionMonitor::new(&client, &api, reconnect_config(3))
        .wait_for_completion(&mut conn, "X", &cancel)
        .await;

    assert_matches!(result, Err(MonitorError::Cancelled));
}

// ---------------------------------------------------------------------------
// Reconnection
// ---------------------------------------------------------------------------

/// N-1 rejected reconnects followed by a good one resume monitoring on
/// the same session id.
#[tokio::test]
async fn reconnects_after_n_minus_one_failures() {
    const N: u32 = 3;
    let engine = MockEngine::start().await;
    engine
        .state
        .script_session(vec![executing(Some("17"), "X"), WsAction::Drop]);
    engine
        .state
        .script_session(vec![executing(None, "X"), WsAction::Hold]);
    // Handshake 1 is the initial connect; reconnects start at 2.
    engine.state.reject_ws_attempts(2..=N);

    let (client, api) = (engine.client(), engine.api());
    let mut conn = client.connect("session-1").await.unwrap();

    let result = ExecutionMonitor::new(&client, &api, reconnect_config(N))
        .wait_for_completion(&mut conn, "X", &CancellationToken::new())
        .await;

    assert_matches!(result, Ok(()));
    let ids = engine.state.ws_client_ids.lock().unwrap().clone();
    assert_eq!(ids.len() as u32, N + 1);
    assert!(ids.iter().all(|id| id == "session-1"));
}

/// N consecutive failed reconnects surface as a lost connection.
#[tokio::test]
async fn n_failures_lose_the_connection() {
    const N: u32 = 3;
    let engine = MockEngine::start().await;
    engine.state.script_session(vec![WsAction::Drop]);
    engine.state.reject_ws_attempts(2..=N + 1);

    let (client, api) = (engine.client(), engine.api());
    let mut conn = client.connect("session-1").await.unwrap();

    let err = ExecutionMonitor::new(&client, &api, reconnect_config(N))
        .wait_for_completion(&mut conn, "X", &CancellationToken::new())
        .await
        .unwrap_err();

    assert_matches!(
        &err,
        MonitorError::Reconnect(ReconnectError::Exhausted { attempts: N, .. })
    );
    assert_matches!(PipelineError::from(err), PipelineError::ConnectionLost(_));
}

/// A dead HTTP root aborts reconnection without opening sockets.
#[tokio::test]
async fn unreachable_server_aborts_reconnect() {
    let engine = MockEngine::start().await;
    engine.state.script_session(vec![WsAction::Drop]);
    let (client, api) = (engine.client(), engine.api());
    let mut conn = client.connect("session-1").await.unwrap();
    engine
        .state
        .root_failures
        .store(u32::MAX, std::sync::atomic::Ordering::SeqCst);

    let result = ExecutionMonitor::new(&client, &api, reconnect_config(5))
        .wait_for_completion(&mut conn, "X", &CancellationToken::new())
        .await;

    assert_matches!(
        result,
        Err(MonitorError::Reconnect(ReconnectError::ServerUnreachable(_)))
    );
    assert_eq!(engine.state.ws_client_ids.lock().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// History fallback
// ---------------------------------------------------------------------------

/// A prompt that finished while disconnected is picked up from history.
#[tokio::test]
async fn finished_during_gap_completes_from_history() {
    let engine = MockEngine::start().await;
    engine.state.script_session(vec![WsAction::Drop]);
    engine
        .state
        .set_history(common::video_history("X", "9", &["out.mp4"]));

    let (client, api) = (engine.client(), engine.api());
    let mut conn = client.connect("session-1").await.unwrap();

    let result = ExecutionMonitor::new(&client, &api, reconnect_config(3))
        .wait_for_completion(&mut conn, "X", &CancellationToken::new())
        .await;

    assert_matches!(result, Ok(()));
}

/// A failed run recorded in history is reported as an execution error.
#[tokio::test]
async fn failed_during_gap_reports_history_error() {
    let engine = MockEngine::start().await;
    engine.state.script_session(vec![WsAction::Drop]);
    engine.state.set_history(serde_json::json!({
        "X": {
            "outputs": {},
            "status": {
                "status_str": "error",
                "completed": false,
                "messages": [
                    ["execution_start", { "prompt_id": "X" }],
                    ["execution_error", { "prompt_id": "X", "exception_message": "out of memory" }]
                ]
            }
        }
    }));

    let (client, api) = (engine.client(), engine.api());
    let mut conn = client.connect("session-1").await.unwrap();

    let result = ExecutionMonitor::new(&client, &api, reconnect_config(3))
        .wait_for_completion(&mut conn, "X", &CancellationToken::new())
        .await;

    assert_matches!(result, Err(MonitorError::ExecutionFailed(msg)) if msg == "out of memory");
}
