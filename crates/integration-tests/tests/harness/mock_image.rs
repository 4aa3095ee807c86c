//! Mock image generation backend for integration tests
//!
//! Speaks the synchronous worker protocol: `POST /` with `{"prompt", "steps"}`
//! answers `{"image": <base64>}` after a configurable delay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router, routing};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

/// Mock image backend with fixed latency
pub struct MockImageBackend {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<BackendState>,
}

struct BackendState {
    image: Vec<u8>,
    latency: Duration,
    /// Number of requests to fail before succeeding (`u32::MAX` = always fail)
    fail_count: AtomicU32,
    request_count: AtomicU32,
    in_flight: AtomicU32,
    peak_in_flight: AtomicU32,
    prompts: std::sync::Mutex<Vec<String>>,
}

impl MockImageBackend {
    /// Start a backend that answers with `image` after `latency`
    pub async fn start(image: &[u8], latency: Duration) -> anyhow::Result<Self> {
        Self::start_inner(image, latency, 0).await
    }

    /// Start a backend that fails the first `n` requests with 500
    pub async fn start_failing(n: u32, latency: Duration) -> anyhow::Result<Self> {
        Self::start_inner(b"LATE", latency, n).await
    }

    /// Start a backend that never succeeds
    pub async fn start_broken(latency: Duration) -> anyhow::Result<Self> {
        Self::start_inner(b"", latency, u32::MAX).await
    }

    async fn start_inner(image: &[u8], latency: Duration, fail_count: u32) -> anyhow::Result<Self> {
        let state = Arc::new(BackendState {
            image: image.to_vec(),
            latency,
            fail_count: AtomicU32::new(fail_count),
            request_count: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            peak_in_flight: AtomicU32::new(0),
            prompts: std::sync::Mutex::default(),
        });

        let app = Router::new()
            .route("/", routing::post(handle_generate))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Worker URL for a `cloudflare` provider
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn request_count(&self) -> u32 {
        self.state.request_count.load(Ordering::SeqCst)
    }

    /// Highest number of requests this backend was serving at once
    pub fn peak_in_flight(&self) -> u32 {
        self.state.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.state.prompts.lock().unwrap().clone()
    }
}

impl Drop for MockImageBackend {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    prompt: String,
    #[allow(dead_code)]
    steps: u32,
}

/// Decrements the in-flight gauge even when the client hangs up mid-request
struct InFlight<'a>(&'a AtomicU32);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn handle_generate(
    State(state): State<Arc<BackendState>>,
    Json(request): Json<GenerateRequest>,
) -> impl IntoResponse {
    state.request_count.fetch_add(1, Ordering::SeqCst);
    state.prompts.lock().unwrap().push(request.prompt);

    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    let _in_flight = InFlight(&state.in_flight);

    tokio::time::sleep(state.latency).await;

    let should_fail = state
        .fail_count
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
            0 => None,
            u32::MAX => Some(u32::MAX),
            n => Some(n - 1),
        })
        .is_ok();

    if should_fail {
        return (StatusCode::INTERNAL_SERVER_ERROR, "model crashed").into_response();
    }

    Json(serde_json::json!({ "image": STANDARD.encode(&state.image) })).into_response()
}
