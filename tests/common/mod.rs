//! In-process stand-in for an OpenAI-compatible API.
//!
//! Embeddings are hashed bags of words, so texts sharing words score higher
//! than texts that share none. Completions return a fixed reply.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::oneshot;

pub const API_KEY: &str = "sk-test";
const DIMS: usize = 32;

#[derive(Clone)]
struct MockState {
    reply: Arc<String>,
    embeddings: Arc<AtomicUsize>,
    completions: Arc<AtomicUsize>,
}

pub struct MockOpenAi {
    pub endpoint: String,
    state: MockState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockOpenAi {
    /// Serve on an ephemeral port; chat completions answer with `reply`.
    pub fn start(reply: &str) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let state = MockState {
            reply: Arc::new(reply.to_string()),
            embeddings: Arc::new(AtomicUsize::new(0)),
            completions: Arc::new(AtomicUsize::new(0)),
        };
        let (tx, rx) = oneshot::channel::<()>();

        let app = Router::new()
            .route("/v1/embeddings", post(embeddings))
            .route("/v1/chat/completions", post(chat))
            .with_state(state.clone());

        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        let _ = rx.await;
                    })
                    .await
                    .unwrap();
            });
        });

        Self {
            endpoint: format!("http://{}/v1", addr),
            state,
            shutdown: Some(tx),
        }
    }

    pub fn embedding_calls(&self) -> usize {
        self.state.embeddings.load(Ordering::SeqCst)
    }

    pub fn completion_calls(&self) -> usize {
        self.state.completions.load(Ordering::SeqCst)
    }
}

impl Drop for MockOpenAi {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", API_KEY))
}

pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let h = word
            .to_ascii_lowercase()
            .bytes()
            .fold(7usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
        v[h % DIMS] += 1.0;
    }
    v
}

async fn embeddings(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    if !authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    state.embeddings.fetch_add(1, Ordering::SeqCst);
    let input = body["input"].as_str().unwrap_or_default();
    Ok(Json(json!({
        "object": "list",
        "model": body["model"],
        "data": [{"object": "embedding", "index": 0, "embedding": bag_of_words(input)}]
    })))
}

async fn chat(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(_body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    if !authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    state.completions.fetch_add(1, Ordering::SeqCst);
    Ok(Json(json!({
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": state.reply.as_str()},
            "finish_reason": "stop"
        }]
    })))
}
