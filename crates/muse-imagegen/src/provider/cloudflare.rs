use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{GenerationProvider, cancellable, decode_image, error_from_response};
use crate::error::{ImageGenError, Result};

/// Diffusion steps when the config does not say otherwise
const DEFAULT_STEPS: u32 = 4;

/// Cloudflare Workers AI behind a custom worker
///
/// The worker answers synchronously with a base64 image.
pub struct CloudflareProvider {
    name: String,
    client: Client,
    worker_url: String,
    steps: u32,
}

impl CloudflareProvider {
    pub fn new(name: String, client: Client, worker_url: String, steps: Option<u32>) -> Self {
        Self {
            name,
            client,
            worker_url,
            steps: steps.unwrap_or(DEFAULT_STEPS),
        }
    }

    async fn request(&self, prompt: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(&self.worker_url)
            .json(&WorkerRequest {
                prompt,
                steps: self.steps,
            })
            .send()
            .await
            .map_err(|e| {
                tracing::error!(provider = %self.name, error = %e, "worker request failed");
                ImageGenError::from_reqwest(&e)
            })?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body: WorkerResponse = response.json().await.map_err(|e| ImageGenError::from_reqwest(&e))?;

        decode_image(&body.image)
    }
}

#[derive(Serialize)]
struct WorkerRequest<'a> {
    prompt: &'a str,
    steps: u32,
}

#[derive(Deserialize)]
struct WorkerResponse {
    #[serde(default)]
    image: String,
}

#[async_trait]
impl GenerationProvider for CloudflareProvider {
    async fn generate(&self, prompt: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let start = Instant::now();

        let result = cancellable(cancel, self.request(prompt)).await.and_then(|r| r);

        muse_telemetry::metrics::record_provider_duration(&self.name, start);
        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}
