//! In-process stand-ins for the registration service, the admin API and the
//! chat host, shared by the unit tests.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Method, StatusCode, Uri},
    Router,
};

use crate::{invite::CommandEvent, message::Reply};

#[derive(Clone, Debug, PartialEq)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub body: String,
}

#[derive(Default)]
struct MockState {
    routes: HashMap<(String, String), (u16, String)>,
    requests: Vec<Recorded>,
}

type Shared = Arc<Mutex<MockState>>;

/// A tiny HTTP server that answers canned responses and remembers every
/// request it saw. Unknown routes get a 404.
pub struct MockApi {
    addr: SocketAddr,
    state: Shared,
}

impl MockApi {
    pub async fn start() -> MockApi {
        let state: Shared = Arc::default();
        let app = Router::new().fallback(record).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockApi { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn respond(&self, method: reqwest::Method, path: &str, status: u16, body: &str) {
        self.state.lock().unwrap().routes.insert(
            (method.as_str().to_string(), path.to_string()),
            (status, body.to_string()),
        );
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().requests.clone()
    }
}

async fn record(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let mut state = state.lock().unwrap();

    state.requests.push(Recorded {
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        authorization: headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });

    match state
        .routes
        .get(&(method.as_str().to_string(), uri.path().to_string()))
    {
        Some((status, body)) => (
            StatusCode::from_u16(*status).unwrap(),
            body.clone(),
        ),
        None => (StatusCode::NOT_FOUND, "no such route".to_string()),
    }
}

/// A chat message that remembers what the bot said back.
pub struct RecordingEvent {
    sender: String,
    replies: Mutex<Vec<Reply>>,
    reads: AtomicUsize,
}

impl RecordingEvent {
    pub fn new(sender: &str) -> RecordingEvent {
        RecordingEvent {
            sender: sender.to_string(),
            replies: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn replies(&self) -> Vec<Reply> {
        self.replies.lock().unwrap().clone()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandEvent for RecordingEvent {
    fn sender(&self) -> &str {
        &self.sender
    }

    async fn respond(&self, reply: Reply) -> Result<()> {
        self.replies.lock().unwrap().push(reply);
        Ok(())
    }

    async fn mark_read(&self) -> Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
