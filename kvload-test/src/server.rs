//! Exposes an in-process key-value server for use in integration tests.
//!
//! The server speaks the same protocol as the targets of a load run: `PUT` with a JSON object of
//! key-value pairs to store them, and `GET` with `{"key": "..."}` to read one value back as text.
//! A [`Behavior`] can make it fail every request instead.
//!
//! ```
//! use kvload_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::new().await;
//!    let url = server.url("/");
//!    // use the URL in tests...
//! }
//! ```

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Router, routing};
use bytes::Bytes;
use serde::Deserialize;

/// How the server answers requests.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Behavior {
    /// Store and serve values like a real key-value server.
    #[default]
    Store,
    /// Answer every request with this status code without touching the store.
    Status(u16),
    /// Accept requests but never answer them.
    Stall,
}

#[derive(Debug, Default)]
struct ServerState {
    behavior: Behavior,
    values: Mutex<HashMap<String, String>>,
    requests: AtomicUsize,
}

impl ServerState {
    /// Counts the request and returns a response if the behavior preempts normal handling.
    async fn intercept(&self) -> Option<Response> {
        let request = self.requests.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(request, behavior = ?self.behavior, "received request");

        match self.behavior {
            Behavior::Store => None,
            Behavior::Status(code) => {
                let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                Some((status, "simulated failure").into_response())
            }
            Behavior::Stall => std::future::pending().await,
        }
    }
}

type ServerRef = Arc<ServerState>;

fn router(state: ServerRef) -> Router {
    Router::new()
        .route("/", routing::put(put_values).get(get_value))
        .with_state(state)
}

async fn put_values(State(state): State<ServerRef>, body: Bytes) -> Response {
    if let Some(response) = state.intercept().await {
        return response;
    }

    let Ok(values) = serde_json::from_slice::<HashMap<String, String>>(&body) else {
        return (StatusCode::BAD_REQUEST, "expected a JSON object of strings").into_response();
    };
    state.values.lock().unwrap().extend(values);

    (StatusCode::CREATED, "OK").into_response()
}

#[derive(Deserialize)]
struct GetBody {
    #[serde(alias = "Key")]
    key: String,
}

async fn get_value(State(state): State<ServerRef>, body: Bytes) -> Response {
    if let Some(response) = state.intercept().await {
        return response;
    }

    let Ok(GetBody { key }) = serde_json::from_slice(&body) else {
        return (StatusCode::BAD_REQUEST, "expected {\"key\": ...}").into_response();
    };

    let value = state.values.lock().unwrap().get(&key).cloned();
    match value {
        Some(value) => (StatusCode::OK, value).into_response(),
        None => (StatusCode::NOT_FOUND, "Key not found.").into_response(),
    }
}

/// An in-process key-value server for use in integration tests.
///
/// The server listens on a random available port on localhost and keeps all values in memory. It
/// shuts down when dropped.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    state: ServerRef,
}

impl TestServer {
    /// Starts a server that stores and serves values.
    pub async fn new() -> Self {
        Self::with_behavior(Behavior::Store).await
    }

    /// Starts a server that answers requests according to `behavior`.
    pub async fn with_behavior(behavior: Behavior) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let state = Arc::new(ServerState {
            behavior,
            ..Default::default()
        });
        let app = router(Arc::clone(&state));

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            handle,
            socket,
            state,
        }
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.socket.port(), path)
    }

    /// The number of requests received so far.
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Returns the value stored under `key`.
    pub fn value(&self, key: &str) -> Option<String> {
        self.state.values.lock().unwrap().get(key).cloned()
    }

    /// The number of stored keys.
    pub fn len(&self) -> usize {
        self.state.values.lock().unwrap().len()
    }

    /// Returns `true` if nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
