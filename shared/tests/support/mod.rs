//! In-process stand-ins for the ideas backend and its push socket.

#![allow(dead_code)]

use async_trait::async_trait;
use ideaboard_shared::capabilities::{
    HttpHeaders, HttpMethod, HttpRequest, HttpResponse, HttpResult, PushError,
};
use ideaboard_shared::shell::{PushConnection, PushConnector};
use ideaboard_shared::{Idea, IdeaId, ViewModel};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

pub const BASE_URL: &str = "http://localhost:4000";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn idea(id: u64, text: &str, upvotes: u64) -> Idea {
    Idea {
        id: IdeaId(id),
        text: text.into(),
        upvotes,
    }
}

/// Waits until the view satisfies `predicate`. Paused test time makes the
/// timeout cheap.
pub async fn wait_for_view(
    view: &mut watch::Receiver<ViewModel>,
    predicate: impl FnMut(&ViewModel) -> bool,
) -> ViewModel {
    tokio::time::timeout(Duration::from_secs(60), view.wait_for(predicate))
        .await
        .expect("view never reached the expected state")
        .expect("runtime stopped")
        .clone()
}

#[derive(Default)]
pub struct FakeServer {
    ideas: Mutex<Vec<Idea>>,
    fail_fetch: AtomicBool,
    fetch_gate: Mutex<Option<oneshot::Receiver<()>>>,
    requests: Mutex<Vec<(HttpMethod, String)>>,
}

impl FakeServer {
    pub fn with_ideas(ideas: Vec<Idea>) -> Arc<Self> {
        let server = Self::default();
        *server.ideas.lock().unwrap() = ideas;
        Arc::new(server)
    }

    pub fn fail_fetches(&self) {
        self.fail_fetch.store(true, Ordering::SeqCst);
    }

    /// The next `GET /ideas` blocks until the returned sender fires.
    pub fn hold_next_fetch(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.fetch_gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn requests(&self) -> Vec<(HttpMethod, String)> {
        self.requests.lock().unwrap().clone()
    }

    fn reply<T: serde::Serialize>(request: &HttpRequest, status: u16, body: &T) -> HttpResult {
        let mut headers = HttpHeaders::new();
        headers.insert("Content-Type", "application/json").unwrap();
        Ok(HttpResponse::new(
            status,
            headers,
            serde_json::to_vec(body).unwrap(),
            request.request_id().to_string(),
        ))
    }

    fn not_found(request: &HttpRequest) -> HttpResult {
        Self::reply(request, 404, &serde_json::json!({"error": "not found"}))
    }
}

#[async_trait]
impl ideaboard_shared::shell::HttpExecutor for FakeServer {
    async fn execute(&self, request: HttpRequest) -> HttpResult {
        let path = request
            .url()
            .as_str()
            .strip_prefix(BASE_URL)
            .unwrap_or_default()
            .to_string();
        self.requests
            .lock()
            .unwrap()
            .push((request.method(), path.clone()));

        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match (request.method(), segments.as_slice()) {
            (HttpMethod::Get, ["ideas"]) => {
                let gate = self.fetch_gate.lock().unwrap().take();
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                if self.fail_fetch.load(Ordering::SeqCst) {
                    return Self::reply(&request, 500, &serde_json::json!({}));
                }
                let ideas = self.ideas.lock().unwrap().clone();
                Self::reply(&request, 200, &ideas)
            }
            (HttpMethod::Post, ["ideas"]) => {
                let body: serde_json::Value =
                    serde_json::from_slice(request.body().unwrap_or_default()).unwrap();
                let text = body["text"].as_str().unwrap_or_default().to_string();
                let created = {
                    let mut ideas = self.ideas.lock().unwrap();
                    let id = ideas.iter().map(|i| i.id.0).max().unwrap_or(0) + 1;
                    let created = idea(id, &text, 0);
                    ideas.insert(0, created.clone());
                    created
                };
                Self::reply(&request, 200, &created)
            }
            (HttpMethod::Post, ["ideas", id, "upvote"]) => {
                let Ok(id) = id.parse::<u64>() else {
                    return Self::not_found(&request);
                };
                let updated = {
                    let mut ideas = self.ideas.lock().unwrap();
                    ideas.iter_mut().find(|i| i.id.0 == id).map(|i| {
                        i.upvotes += 1;
                        i.clone()
                    })
                };
                match updated {
                    Some(updated) => Self::reply(&request, 200, &updated),
                    None => Self::not_found(&request),
                }
            }
            _ => Self::not_found(&request),
        }
    }
}

/// Push endpoint double. Each accepted connection gets a frame injector;
/// dropping the injector looks like the server closing the socket.
#[derive(Default)]
pub struct FakePushServer {
    refuse: AtomicBool,
    attempts: AtomicU32,
    closed: Arc<AtomicU32>,
    sockets: Mutex<Vec<mpsc::UnboundedSender<String>>>,
    urls: Mutex<Vec<String>>,
}

impl FakePushServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refusing() -> Arc<Self> {
        let server = Self::default();
        server.refuse.store(true, Ordering::SeqCst);
        Arc::new(server)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Sockets closed from the client side.
    pub fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub fn send_to_latest(&self, frame: impl Into<String>) {
        let sockets = self.sockets.lock().unwrap();
        sockets
            .last()
            .expect("no accepted push connection")
            .send(frame.into())
            .expect("push connection already gone");
    }

    pub fn drop_latest(&self) {
        self.sockets.lock().unwrap().pop();
    }
}

#[async_trait]
impl PushConnector for FakePushServer {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushConnection>, PushError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());

        if self.refuse.load(Ordering::SeqCst) {
            return Err(PushError::Connect {
                url: url.to_string(),
                message: "connection refused".into(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.sockets.lock().unwrap().push(tx);
        Ok(Box::new(FakeSocket {
            frames: rx,
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct FakeSocket {
    frames: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicU32>,
}

#[async_trait]
impl PushConnection for FakeSocket {
    async fn next_frame(&mut self) -> Option<Result<String, PushError>> {
        self.frames.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
