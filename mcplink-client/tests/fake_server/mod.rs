//! A fake MCP-Link server for exercising the client end-to-end over real HTTP.
//!
//! `GET /sse` opens the event stream and `POST /messages/` accepts requests, the same shape as the
//! real server.  The tests decide what goes on the stream: the preamble sent when the stream
//! opens, frames pushed at any time afterwards, and optionally an automatic responder that answers
//! each accepted request with a frame of its own.
#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::StreamExt;
use futures::channel::mpsc;
use mcplink_client::{ConnectionConfig, Endpoint};
use mcplink_jsonrpc::{ErrorDetails, Id, Response as JsonRpcResponse};
use serde_json::Value as JsonValue;
use tokio::sync::watch;

pub const AUTHORIZATION: &str = "Bearer fake-server-token";
pub const SESSION_ID: &str = "f00dcafe";

type Responder = Box<dyn Fn(&JsonValue) -> Option<JsonValue> + Send + Sync>;

struct ServerState {
    preamble: String,
    close_after_preamble: bool,
    post_status: Mutex<StatusCode>,
    responder: Mutex<Option<Responder>>,
    stream: Mutex<Option<mpsc::UnboundedSender<String>>>,
    posts: watch::Sender<Vec<JsonValue>>,
}

pub struct FakeServer {
    base_url: String,
    state: Arc<ServerState>,
    task: tokio::task::JoinHandle<()>,
}

/// The endpoint event a real server sends first
pub fn endpoint_preamble() -> String {
    format!("event: endpoint\ndata: /messages/?session_id={SESSION_ID}\n\n")
}

impl FakeServer {
    pub async fn start() -> Self {
        Self::start_with_preamble(endpoint_preamble(), false).await
    }

    /// Start a server that sends `preamble` as soon as the stream opens, and then either keeps the
    /// stream open or closes it.
    pub async fn start_with_preamble(preamble: impl Into<String>, close_after_preamble: bool) -> Self {
        let (posts, _) = watch::channel(Vec::new());
        let state = Arc::new(ServerState {
            preamble: preamble.into(),
            close_after_preamble,
            post_status: Mutex::new(StatusCode::ACCEPTED),
            responder: Mutex::new(None),
            stream: Mutex::new(None),
            posts,
        });

        let app = Router::new()
            .route("/sse", get(open_stream))
            .route("/messages/", post(accept_message))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            task,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(&format!("{}/sse", self.base_url), AUTHORIZATION).unwrap()
    }

    pub fn endpoint_with_authorization(&self, authorization: &str) -> Endpoint {
        Endpoint::new(&format!("{}/sse", self.base_url), authorization).unwrap()
    }

    /// Connection config with deadlines short enough for tests
    pub fn config() -> ConnectionConfig {
        ConnectionConfig {
            handshake_timeout: Duration::from_secs(2),
            post_timeout: Duration::from_secs(2),
            default_call_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    /// HTTP status to answer every POST with from now on
    pub fn set_post_status(&self, status: StatusCode) {
        *self.state.post_status.lock().unwrap() = status;
    }

    /// Answer each accepted request with whatever frame `responder` returns for it
    pub fn set_responder(&self, responder: impl Fn(&JsonValue) -> Option<JsonValue> + Send + Sync + 'static) {
        *self.state.responder.lock().unwrap() = Some(Box::new(responder));
    }

    /// Push a frame on the event stream as the data of a `message` event
    pub fn push_frame(&self, frame: JsonValue) {
        self.state.push(format!("data: {frame}\n\n"));
    }

    /// Push raw text on the event stream
    pub fn push_raw(&self, text: impl Into<String>) {
        self.state.push(text.into());
    }

    /// End the event stream
    pub fn close_stream(&self) {
        self.state.stream.lock().unwrap().take();
    }

    /// Every request body POSTed so far
    pub fn posts(&self) -> Vec<JsonValue> {
        self.state.posts.borrow().clone()
    }

    /// Wait until at least `count` requests have been POSTed, and return all of them
    pub async fn wait_for_posts(&self, count: usize) -> Vec<JsonValue> {
        let mut posts = self.state.posts.subscribe();
        tokio::time::timeout(Duration::from_secs(5), posts.wait_for(|posts| posts.len() >= count))
            .await
            .expect("Timed out waiting for requests")
            .unwrap()
            .clone()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.close_stream();
        self.task.abort();
    }
}

impl ServerState {
    fn push(&self, text: String) {
        let stream = self.stream.lock().unwrap();
        let stream = stream.as_ref().expect("The event stream is not open");
        stream.unbounded_send(text).expect("The client went away");
    }
}

fn request_id(request: &JsonValue) -> Id {
    serde_json::from_value(request["id"].clone()).expect("Request has no valid id")
}

/// A successful reply to `request`
pub fn reply_to(request: &JsonValue, result: JsonValue) -> JsonValue {
    serde_json::to_value(JsonRpcResponse::success(request_id(request), result)).unwrap()
}

/// An error reply to `request`
pub fn error_reply_to(request: &JsonValue, error: ErrorDetails) -> JsonValue {
    serde_json::to_value(JsonRpcResponse::error(request_id(request), error)).unwrap()
}

async fn open_stream(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let (tx, rx) = mpsc::unbounded::<String>();
    if !state.preamble.is_empty() {
        tx.unbounded_send(state.preamble.clone()).unwrap();
    }

    if !state.close_after_preamble {
        *state.stream.lock().unwrap() = Some(tx);
    }

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(rx.map(Ok::<_, Infallible>)))
        .unwrap()
}

async fn accept_message(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    if query.get("session_id").map(String::as_str) != Some(SESSION_ID) {
        return StatusCode::NOT_FOUND;
    }
    if headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) != Some("application/json") {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE;
    }

    let Ok(request) = serde_json::from_str::<JsonValue>(&body) else {
        return StatusCode::BAD_REQUEST;
    };

    state.posts.send_modify(|posts| posts.push(request.clone()));

    let status = *state.post_status.lock().unwrap();
    if status == StatusCode::ACCEPTED {
        let reply = state
            .responder
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|responder| responder(&request));
        if let Some(reply) = reply {
            state.push(format!("data: {reply}\n\n"));
        }
    }

    status
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) == Some(AUTHORIZATION)
}
