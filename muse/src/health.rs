use std::sync::{Arc, OnceLock};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use muse_config::HealthConfig;
use muse_dispatch::DispatcherHandle;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Readiness source, filled in once the dispatcher has started
#[derive(Clone, Default)]
pub struct Readiness {
    dispatcher: Arc<OnceLock<DispatcherHandle>>,
}

impl Readiness {
    pub fn set(&self, handle: DispatcherHandle) {
        if self.dispatcher.set(handle).is_err() {
            tracing::warn!("readiness already bound to a dispatcher");
        }
    }

    fn is_ready(&self) -> bool {
        self.dispatcher.get().is_some_and(|d| !d.is_draining())
    }
}

async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readiness(State(readiness): State<Readiness>) -> impl IntoResponse {
    if readiness.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

pub fn router(config: &HealthConfig, readiness: Readiness) -> Router {
    Router::new()
        .route(&config.liveness_path, get(liveness))
        .route(&config.readiness_path, get(self::readiness))
        .with_state(readiness)
}

/// Bind the health listener and serve it in the background until `shutdown`
pub async fn spawn(config: &HealthConfig, readiness: Readiness, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.listen_address).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "health endpoints listening");

    let app = router(config, readiness);

    tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        if let Err(e) = served {
            tracing::error!(error = %e, "health server failed");
        }
    });

    Ok(())
}
