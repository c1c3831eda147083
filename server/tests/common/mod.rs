//! Common Test Utilities for Integration Tests
//!
//! An in-process mock of the chat service: the bootstrap HTTP API and
//! the encrypted WebSocket chat endpoint, served by axum on an
//! ephemeral port. Each accepted question is answered with a partial
//! chunk followed by a terminal frame, the way the real service
//! streams responses.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chatload_server::codec;
use chatload_server::config::{Config, CoursePool, QuestionPlan, TargetConfig};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Knobs for the mock service plus call counters
#[derive(Default)]
pub struct MockChatOptions {
    /// Token endpoint answers with `success: "0"`
    pub fail_token: bool,
    /// Token endpoint leaves out the session id, forcing the
    /// create-chat fallback
    pub omit_session_id: bool,
    /// Close the socket after answering this many questions
    pub answer_limit: Option<usize>,
}

#[derive(Clone)]
pub struct MockState {
    options: Arc<MockChatOptions>,
    pub token_calls: Arc<AtomicUsize>,
    pub create_chat_calls: Arc<AtomicUsize>,
    pub ws_connections: Arc<AtomicUsize>,
}

/// Handle to a running mock chat service
pub struct MockChatService {
    pub addr: SocketAddr,
    pub state: MockState,
}

impl MockChatService {
    /// Bind an ephemeral port and serve the mock in the background
    pub async fn spawn(options: MockChatOptions) -> Self {
        let state = MockState {
            options: Arc::new(options),
            token_calls: Arc::new(AtomicUsize::new(0)),
            create_chat_calls: Arc::new(AtomicUsize::new(0)),
            ws_connections: Arc::new(AtomicUsize::new(0)),
        };

        let app = Router::new()
            .route("/v1/generate-token", post(generate_token))
            .route("/v1/create-chat", post(create_chat))
            .route("/v6/ws", get(ws_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock chat service");
        let addr = listener.local_addr().expect("mock local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve mock");
        });

        Self { addr, state }
    }

    /// Target pointing at this mock
    pub fn target(&self) -> TargetConfig {
        let mut target = TargetConfig::default();
        target.api_base_url = format!("http://{}", self.addr);
        target.websocket_url = format!("ws://{}/v6/ws", self.addr);
        target.websocket_origin = "http://localhost".to_string();
        target.encryption_enabled = true;
        target.connect_timeout = Duration::from_secs(5);
        target
    }

    pub fn token_calls(&self) -> usize {
        self.state.token_calls.load(Ordering::SeqCst)
    }

    pub fn create_chat_calls(&self) -> usize {
        self.state.create_chat_calls.load(Ordering::SeqCst)
    }

    pub fn ws_connections(&self) -> usize {
        self.state.ws_connections.load(Ordering::SeqCst)
    }
}

async fn generate_token(State(state): State<MockState>) -> Json<Value> {
    state.token_calls.fetch_add(1, Ordering::SeqCst);
    if state.options.fail_token {
        return Json(json!({ "success": "0" }));
    }
    let mut body = json!({
        "success": "1",
        "token": format!("tok-{}", Uuid::new_v4()),
        "client_code": "CC1",
        "connection_id": Uuid::new_v4().to_string(),
    });
    if !state.options.omit_session_id {
        body["session_id"] = json!(Uuid::new_v4().to_string());
    }
    Json(body)
}

async fn create_chat(State(state): State<MockState>) -> Json<Value> {
    state.create_chat_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "session_id": Uuid::new_v4().to_string() }))
}

async fn ws_handler(State(state): State<MockState>, ws: WebSocketUpgrade) -> Response {
    state.ws_connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Answer each question with one partial chunk and one terminal frame
async fn handle_socket(mut socket: WebSocket, state: MockState) {
    let mut answered = 0usize;
    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(plain) = codec::decrypt(&text, true) else {
            continue;
        };
        let Ok(request) = serde_json::from_str::<Value>(&plain) else {
            continue;
        };

        if let Some(limit) = state.options.answer_limit {
            if answered >= limit {
                break;
            }
        }
        answered += 1;

        let question = request["user_message"].as_str().unwrap_or_default();
        let partial = json!({ "partial_response": "thinking" });
        let terminal = json!({
            "session_attributes": { "turns": answered },
            "complete_response": format!("echo: {question}"),
        });
        for chunk in [partial, terminal] {
            let frame = codec::encrypt(&chunk.to_string(), true);
            if socket.send(Message::Text(frame)).await.is_err() {
                return;
            }
        }
    }
}

/// Config wired to the mock, with small test-friendly intervals
pub fn test_config(service: &MockChatService, questions_per_course: usize) -> Config {
    let mut config = Config::default();
    config.target = service.target();
    config.load.num_sessions = 2;
    config.load.monitor_interval = Duration::from_millis(200);
    config.load.ramp_interval = Duration::from_millis(10);
    config.questions = QuestionPlan {
        courses: vec![CoursePool {
            course_id: "ANAT101".to_string(),
            questions: (1..=questions_per_course)
                .map(|i| format!("What is topic {i}?"))
                .collect(),
        }],
    };
    config
}
