pub(crate) mod cloudflare;
pub(crate) mod fusion_brain;
pub(crate) mod yandex_art;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use muse_config::ImageGenProviderConfig;
use tokio_util::sync::CancellationToken;

use crate::error::{ImageGenError, Result};

/// Trait for image generation backends
///
/// Implementations must honour `cancel` for every wait they perform,
/// including HTTP calls and the delay between status polls.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Generate a single image for `prompt`, returning encoded image bytes
    async fn generate(&self, prompt: &str, cancel: &CancellationToken) -> Result<Vec<u8>>;

    /// Get the provider name
    fn name(&self) -> &str;
}

/// Run `fut` unless `cancel` fires first
pub(crate) async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ImageGenError::Cancelled),
        output = fut => Ok(output),
    }
}

/// Map a non-success HTTP response to an error
pub(crate) async fn error_from_response(response: reqwest::Response) -> ImageGenError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_owned());

    match status {
        401 | 403 => ImageGenError::AuthenticationFailed(message),
        _ => ImageGenError::ProviderApiError { status, message },
    }
}

pub(crate) fn decode_image(encoded: &str) -> Result<Vec<u8>> {
    let image = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ImageGenError::InvalidResponse(format!("image is not valid base64: {e}")))?;

    if image.is_empty() {
        return Err(ImageGenError::InvalidResponse("image is empty".to_owned()));
    }

    Ok(image)
}

/// How often and how many times an async job is polled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    pub max_polls: u32,
}

impl PollSchedule {
    /// Take overrides from provider config, falling back to the given defaults
    pub(crate) fn from_config(config: &ImageGenProviderConfig, default: Self) -> Self {
        Self {
            interval: config.poll_interval.unwrap_or(default.interval),
            max_polls: config.max_polls.unwrap_or(default.max_polls),
        }
    }

    /// Poll `check` until it yields a value
    ///
    /// Each attempt waits `interval` first. Transient failures are logged
    /// and retried; any other error ends polling.
    pub(crate) async fn run<T, F, Fut>(self, provider: &str, cancel: &CancellationToken, mut check: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        for attempt in 1..=self.max_polls {
            cancellable(cancel, tokio::time::sleep(self.interval)).await?;

            match cancellable(cancel, check()).await? {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {
                    tracing::debug!(provider, attempt, max_polls = self.max_polls, "job still running");
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(provider, attempt, error = %e, "status check failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(ImageGenError::PollExhausted {
            attempts: self.max_polls,
        })
    }
}
