//! Shared test helpers: an in-process mock execution node.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tokio::sync::Mutex;

/// How the mock node answers the next requests.
#[derive(Clone)]
pub enum Behavior {
    Respond { status: u16, body: String },
    Delay { duration: Duration, status: u16, body: String },
}

#[derive(Clone)]
struct MockState {
    requests: Arc<AtomicUsize>,
    behavior: Arc<Mutex<Behavior>>,
    last_path: Arc<Mutex<Option<String>>>,
}

/// A mock execution node answering POSTs on an ephemeral port.
#[derive(Clone)]
pub struct MockNode {
    pub uri: String,
    state: MockState,
}

impl MockNode {
    pub async fn set_response(&self, status: u16, body: &str) {
        *self.state.behavior.lock().await = Behavior::Respond {
            status,
            body: body.to_string(),
        };
    }

    pub async fn set_delay(&self, duration: Duration, status: u16, body: &str) {
        *self.state.behavior.lock().await = Behavior::Delay {
            duration,
            status,
            body: body.to_string(),
        };
    }

    /// Number of requests the node has received.
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    pub async fn last_path(&self) -> Option<String> {
        self.state.last_path.lock().await.clone()
    }
}

async fn handler(State(state): State<MockState>, uri: Uri) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    *state.last_path.lock().await = Some(uri.path().to_string());

    let behavior = state.behavior.lock().await.clone();
    let (status, body) = match behavior {
        Behavior::Respond { status, body } => (status, body),
        Behavior::Delay {
            duration,
            status,
            body,
        } => {
            tokio::time::sleep(duration).await;
            (status, body)
        }
    };

    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        body,
    )
        .into_response()
}

/// Starts a mock node that answers every POST with a JSON-RPC result until
/// reconfigured via [`MockNode::set_response`] / [`MockNode::set_delay`].
pub async fn spawn_mock_node() -> MockNode {
    let state = MockState {
        requests: Arc::new(AtomicUsize::new(0)),
        behavior: Arc::new(Mutex::new(Behavior::Respond {
            status: 200,
            body: r#"{"jsonrpc":"2.0","id":1,"result":"ok"}"#.to_string(),
        })),
        last_path: Arc::new(Mutex::new(None)),
    };

    let app = Router::new()
        .route("/", post(handler))
        .fallback(handler)
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("binding mock node listener");
    let addr = listener.local_addr().expect("mock node local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockNode {
        uri: format!("http://{addr}"),
        state,
    }
}
