//! In-process stand-in for a ComfyUI server.
//!
//! Serves the HTTP endpoints the worker uses plus a scripted WebSocket
//! at `/ws`. Every knob lives in [`MockState`] so a test can shape the
//! engine's behaviour before (and while) the worker talks to it.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use ffgo_comfyui::api::ComfyUIApi;
use ffgo_comfyui::client::ComfyUIClient;
use ffgo_comfyui::probe::ProbeConfig;
use ffgo_comfyui::reconnect::ReconnectConfig;
use ffgo_pipeline::{ArtifactDelivery, Orchestrator, PipelineConfig};

/// Node class the readiness tests wait for.
pub const VIDEO_NODE: &str = "VHS_VideoCombine";

/// One step of a scripted WebSocket session.
#[derive(Debug, Clone)]
pub enum WsAction {
    /// Push a text frame to the client.
    Send(String),
    /// Drop the TCP connection without a close handshake.
    Drop,
    /// Keep the session open until the client closes it.
    Hold,
}

#[derive(Default)]
pub struct MockState {
    /// `GET /` answers 503 while this is non-zero (decremented per call).
    pub root_failures: AtomicU32,
    pub root_calls: AtomicU32,

    /// `/object_info` lists [`VIDEO_NODE`] from this call number on
    /// (1-based). Zero means never.
    pub node_visible_on: AtomicU32,
    pub object_info_calls: AtomicU32,

    /// `(file name, bytes)` of every accepted upload.
    pub uploads: Mutex<Vec<(String, Vec<u8>)>>,
    pub upload_calls: AtomicU32,
    /// File names whose upload is answered with 500.
    pub rejected_uploads: Mutex<HashSet<String>>,

    /// Status and body returned by `POST /prompt`.
    pub prompt_response: Mutex<Option<(StatusCode, Value)>>,
    /// Bodies received on `POST /prompt`.
    pub submitted: Mutex<Vec<Value>>,

    /// Scripts for successive WebSocket sessions; an exhausted queue
    /// yields sessions that just hold.
    pub ws_sessions: Mutex<VecDeque<Vec<WsAction>>>,
    pub ws_attempts: AtomicU32,
    /// 1-based handshake attempts answered with 503 instead of an upgrade.
    pub rejected_ws_attempts: Mutex<HashSet<u32>>,
    /// `clientId` of every handshake, in order.
    pub ws_client_ids: Mutex<Vec<String>>,
    /// Held sessions the client closed with a close frame.
    pub closed_sessions: AtomicU32,

    /// Whole `/history/{id}` response, keyed by prompt id.
    pub history: Mutex<Value>,
    /// `/view` payloads keyed by file name.
    pub view_files: Mutex<HashMap<String, Vec<u8>>>,

    /// Bodies received on `POST /queue`.
    pub queue_requests: Mutex<Vec<Value>>,
    pub interrupts: AtomicU32,
}

impl MockState {
    pub fn script_session(&self, actions: Vec<WsAction>) {
        self.ws_sessions.lock().unwrap().push_back(actions);
    }

    pub fn reject_ws_attempts(&self, attempts: impl IntoIterator<Item = u32>) {
        self.rejected_ws_attempts.lock().unwrap().extend(attempts);
    }

    pub fn set_history(&self, history: Value) {
        *self.history.lock().unwrap() = history;
    }

    pub fn add_view_file(&self, filename: &str, bytes: &[u8]) {
        self.view_files
            .lock()
            .unwrap()
            .insert(filename.to_string(), bytes.to_vec());
    }
}

/// A running mock engine bound to an ephemeral localhost port.
pub struct MockEngine {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockEngine {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());

        let app = Router::new()
            .route("/", get(root))
            .route("/object_info", get(object_info))
            .route("/upload/image", post(upload_image))
            .route("/prompt", post(prompt))
            .route("/queue", post(queue))
            .route("/interrupt", post(interrupt))
            .route("/history/{prompt_id}", get(history))
            .route("/view", get(view))
            .route("/ws", get(ws))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    /// `host:port`, the form `COMFY_HOST` takes.
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn api(&self) -> ComfyUIApi {
        ComfyUIApi::new(format!("http://{}", self.addr))
    }

    pub fn client(&self) -> ComfyUIClient {
        ComfyUIClient::new(format!("ws://{}", self.addr))
    }

    pub fn orchestrator(&self, config: PipelineConfig, delivery: ArtifactDelivery) -> Orchestrator {
        Orchestrator::new(&self.host(), config, None, delivery)
    }
}

/// Pipeline settings with short waits so failures surface quickly.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        probe: ProbeConfig {
            max_attempts: 5,
            interval: Duration::from_millis(5),
        },
        reconnect: ReconnectConfig {
            max_attempts: 3,
            delay: Duration::from_millis(10),
        },
        ..Default::default()
    }
}

/// Poll `check` for up to a second; server-side effects of a client
/// action land asynchronously.
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// ---------------------------------------------------------------------------
// Event frames
// ---------------------------------------------------------------------------

pub fn executing(node: Option<&str>, prompt_id: &str) -> WsAction {
    WsAction::Send(
        json!({ "type": "executing", "data": { "node": node, "prompt_id": prompt_id } })
            .to_string(),
    )
}

pub fn progress(value: i64, max: i64, prompt_id: &str) -> WsAction {
    WsAction::Send(
        json!({ "type": "progress", "data": { "value": value, "max": max, "prompt_id": prompt_id } })
            .to_string(),
    )
}

pub fn execution_error(prompt_id: &str, message: &str) -> WsAction {
    WsAction::Send(
        json!({
            "type": "execution_error",
            "data": {
                "prompt_id": prompt_id,
                "node_id": "57",
                "exception_type": "RuntimeError",
                "exception_message": message
            }
        })
        .to_string(),
    )
}

/// History response with one finished node producing `videos`.
pub fn video_history(prompt_id: &str, node: &str, filenames: &[&str]) -> Value {
    let videos: Vec<Value> = filenames
        .iter()
        .map(|f| json!({ "filename": f, "subfolder": "", "type": "output" }))
        .collect();
    json!({
        prompt_id: {
            "outputs": { node: { "videos": videos } },
            "status": { "status_str": "success", "completed": true, "messages": [] }
        }
    })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn root(State(state): State<Arc<MockState>>) -> StatusCode {
    state.root_calls.fetch_add(1, Ordering::SeqCst);
    let failing = state
        .root_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn object_info(State(state): State<Arc<MockState>>) -> Json<Value> {
    let call = state.object_info_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let visible_on = state.node_visible_on.load(Ordering::SeqCst);
    if visible_on != 0 && call >= visible_on {
        Json(json!({ "KSampler": {}, VIDEO_NODE: { "output": ["VHS_FILENAMES"] } }))
    } else {
        Json(json!({ "KSampler": {} }))
    }
}

async fn upload_image(State(state): State<Arc<MockState>>, mut multipart: Multipart) -> Response {
    state.upload_calls.fetch_add(1, Ordering::SeqCst);

    let mut file = None;
    let mut overwrite = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        let part = field.name().map(str::to_string);
        match part.as_deref() {
            Some("image") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.unwrap_or_default().to_vec();
                file = Some((name, bytes));
            }
            Some("overwrite") => overwrite = field.text().await.ok(),
            _ => {}
        }
    }

    let Some((name, bytes)) = file else {
        return (StatusCode::BAD_REQUEST, "missing image part").into_response();
    };
    if overwrite.as_deref() != Some("true") {
        return (StatusCode::BAD_REQUEST, "overwrite must be true").into_response();
    }
    if state.rejected_uploads.lock().unwrap().contains(&name) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "disk full").into_response();
    }

    state.uploads.lock().unwrap().push((name.clone(), bytes));
    Json(json!({ "name": name, "subfolder": "", "type": "input" })).into_response()
}

async fn prompt(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.submitted.lock().unwrap().push(body);
    let (status, body) = state
        .prompt_response
        .lock()
        .unwrap()
        .clone()
        .unwrap_or((StatusCode::OK, json!({ "prompt_id": "test-id", "number": 1 })));
    (status, Json(body)).into_response()
}

async fn queue(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> StatusCode {
    state.queue_requests.lock().unwrap().push(body);
    StatusCode::OK
}

async fn interrupt(State(state): State<Arc<MockState>>) -> StatusCode {
    state.interrupts.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn history(
    State(state): State<Arc<MockState>>,
    Path(prompt_id): Path<String>,
) -> Json<Value> {
    let history = state.history.lock().unwrap().clone();
    match history.get(&prompt_id) {
        Some(record) => Json(json!({ prompt_id: record })),
        None => Json(json!({})),
    }
}

async fn view(
    State(state): State<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let filename = params.get("filename").cloned().unwrap_or_default();
    match state.view_files.lock().unwrap().get(&filename) {
        Some(bytes) => bytes.clone().into_response(),
        None => (StatusCode::NOT_FOUND, "no such file").into_response(),
    }
}

async fn ws(
    State(state): State<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let attempt = state.ws_attempts.fetch_add(1, Ordering::SeqCst) + 1;
    state
        .ws_client_ids
        .lock()
        .unwrap()
        .push(params.get("clientId").cloned().unwrap_or_default());

    if state.rejected_ws_attempts.lock().unwrap().contains(&attempt) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let script = state
        .ws_sessions
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| vec![WsAction::Hold]);
    upgrade.on_upgrade(move |socket| play(socket, script, state))
}

async fn play(mut socket: WebSocket, script: Vec<WsAction>, state: Arc<MockState>) {
    for action in script {
        match action {
            WsAction::Send(text) => {
                if socket.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            WsAction::Drop => return,
            WsAction::Hold => {
                while let Some(Ok(message)) = socket.recv().await {
                    if matches!(message, Message::Close(_)) {
                        state.closed_sessions.fetch_add(1, Ordering::SeqCst);
                        break;
                    }
                }
                return;
            }
        }
    }
}
