use std::time::{Duration, Instant};

use async_trait::async_trait;
use muse_auth::CredentialCache;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{GenerationProvider, PollSchedule, cancellable, decode_image, error_from_response};
use crate::error::{ImageGenError, Result};

/// Default Foundation Models API base URL
const DEFAULT_BASE_URL: &str = "https://llm.api.cloud.yandex.net";

/// Fixed seed so the same prompt yields a stable picture
const SEED: &str = "1863";

pub(crate) const DEFAULT_POLL: PollSchedule = PollSchedule {
    interval: Duration::from_secs(5),
    max_polls: 60,
};

/// Yandex ART provider: async generation job plus operation polling
pub struct YandexArtProvider {
    name: String,
    client: Client,
    credentials: CredentialCache,
    folder_id: String,
    base_url: String,
    poll: PollSchedule,
}

impl YandexArtProvider {
    /// Create a new Yandex ART provider
    pub fn new(
        name: String,
        client: Client,
        credentials: CredentialCache,
        folder_id: String,
        base_url: Option<String>,
    ) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());

        Self {
            name,
            client,
            credentials,
            folder_id,
            base_url: base_url.trim_end_matches('/').to_owned(),
            poll: DEFAULT_POLL,
        }
    }

    /// Override the operation polling schedule
    #[must_use]
    pub fn with_poll_schedule(mut self, poll: PollSchedule) -> Self {
        self.poll = poll;
        self
    }

    async fn start_job(&self, prompt: &str, token: SecretString) -> Result<String> {
        let url = format!("{}/foundationModels/v1/imageGenerationAsync", self.base_url);
        let model_uri = format!("art://{}/yandex-art/latest", self.folder_id);

        let request = ArtRequest {
            model_uri: &model_uri,
            generation_options: GenerationOptions {
                seed: SEED,
                aspect_ratio: AspectRatio {
                    width_ratio: "1",
                    height_ratio: "1",
                },
            },
            messages: [ArtMessage {
                weight: "1",
                text: prompt,
            }],
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| ImageGenError::from_reqwest(&e))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let operation: Operation = response.json().await.map_err(|e| ImageGenError::from_reqwest(&e))?;

        if operation.id.is_empty() {
            return Err(ImageGenError::InvalidResponse("no operation id in response".to_owned()));
        }

        Ok(operation.id)
    }

    async fn run_job(&self, prompt: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let operation_id = cancellable(
            cancel,
            self.credentials.with_token(|token| self.start_job(prompt, token)),
        )
        .await??;

        tracing::debug!(provider = %self.name, operation_id = %operation_id, "generation job started");

        let operation_id = operation_id.as_str();
        self.poll
            .run(&self.name, cancel, move || {
                self.credentials.with_token(move |token| self.operation_status(operation_id, token))
            })
            .await
    }

    async fn operation_status(&self, operation_id: &str, token: SecretString) -> Result<Option<Vec<u8>>> {
        let url = format!("{}/operations/{operation_id}", self.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| ImageGenError::from_reqwest(&e))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let operation: Operation = response.json().await.map_err(|e| ImageGenError::from_reqwest(&e))?;

        if !operation.done {
            return Ok(None);
        }

        if let Some(error) = operation.error {
            return Err(ImageGenError::GenerationFailed(error.message));
        }

        match operation.response.and_then(|r| r.image) {
            Some(image) if !image.is_empty() => decode_image(&image).map(Some),
            _ => Err(ImageGenError::GenerationFailed(
                "operation completed without image data".to_owned(),
            )),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ArtRequest<'a> {
    model_uri: &'a str,
    generation_options: GenerationOptions,
    messages: [ArtMessage<'a>; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationOptions {
    seed: &'static str,
    aspect_ratio: AspectRatio,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AspectRatio {
    width_ratio: &'static str,
    height_ratio: &'static str,
}

#[derive(Serialize)]
struct ArtMessage<'a> {
    weight: &'static str,
    text: &'a str,
}

#[derive(Deserialize)]
struct Operation {
    #[serde(default)]
    id: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    response: Option<OperationResponse>,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Deserialize)]
struct OperationResponse {
    image: Option<String>,
}

#[derive(Deserialize)]
struct OperationError {
    #[serde(default)]
    message: String,
}

#[async_trait]
impl GenerationProvider for YandexArtProvider {
    async fn generate(&self, prompt: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let start = Instant::now();

        tracing::debug!(provider = %self.name, prompt_length = prompt.len(), "starting Yandex ART generation");

        let result = self.run_job(prompt, cancel).await;

        muse_telemetry::metrics::record_provider_duration(&self.name, start);
        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}
