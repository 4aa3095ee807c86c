use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, multipart};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use super::{GenerationProvider, PollSchedule, cancellable, decode_image, error_from_response};
use crate::error::{ImageGenError, Result};

/// Default `FusionBrain` API base URL
const DEFAULT_BASE_URL: &str = "https://api-key.fusionbrain.ai/";

/// Image side in pixels
const IMAGE_SIZE: u32 = 1024;

pub(crate) const DEFAULT_POLL: PollSchedule = PollSchedule {
    interval: Duration::from_secs(10),
    max_polls: 60,
};

/// Kandinsky image generation via the `FusionBrain` API
pub struct FusionBrainProvider {
    name: String,
    client: Client,
    api_key: SecretString,
    secret_key: SecretString,
    base_url: String,
    model_id: OnceCell<u64>,
    poll: PollSchedule,
}

impl FusionBrainProvider {
    /// Create a new `FusionBrain` provider
    ///
    /// The model id is discovered on first use and cached afterwards.
    pub fn new(
        name: String,
        client: Client,
        api_key: SecretString,
        secret_key: SecretString,
        base_url: Option<String>,
    ) -> Self {
        let mut base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Self {
            name,
            client,
            api_key,
            secret_key,
            base_url,
            model_id: OnceCell::new(),
            poll: DEFAULT_POLL,
        }
    }

    /// Override the job polling schedule
    #[must_use]
    pub fn with_poll_schedule(mut self, poll: PollSchedule) -> Self {
        self.poll = poll;
        self
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("X-Key", format!("Key {}", self.api_key.expose_secret()))
            .header("X-Secret", format!("Secret {}", self.secret_key.expose_secret()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}key/api/v1/{path}", self.base_url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| ImageGenError::from_reqwest(&e))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(response)
    }

    async fn model_id(&self) -> Result<u64> {
        self.model_id
            .get_or_try_init(|| async {
                let models: Vec<Model> = self
                    .send(self.client.get(self.url("models")))
                    .await?
                    .json()
                    .await
                    .map_err(|e| ImageGenError::from_reqwest(&e))?;

                let model = models
                    .first()
                    .ok_or_else(|| ImageGenError::GenerationFailed("no models available".to_owned()))?;

                tracing::debug!(provider = %self.name, model_id = model.id, "discovered model");
                Ok(model.id)
            })
            .await
            .copied()
    }

    async fn check_availability(&self, model_id: u64) -> Result<()> {
        let url = self.url(&format!("text2image/availability?model_id={model_id}"));

        let status: Availability = self
            .send(self.client.get(url))
            .await?
            .json()
            .await
            .map_err(|e| ImageGenError::from_reqwest(&e))?;

        if status.model_status.as_deref() == Some("DISABLED_BY_QUEUE") {
            return Err(ImageGenError::GenerationFailed("model is disabled by queue".to_owned()));
        }

        Ok(())
    }

    async fn start_job(&self, model_id: u64, prompt: &str) -> Result<String> {
        let params = GenerateParams {
            kind: "GENERATE",
            num_images: 1,
            width: IMAGE_SIZE,
            height: IMAGE_SIZE,
            generate_params: Query { query: prompt },
        };

        let params = serde_json::to_string(&params)
            .map_err(|e| ImageGenError::InvalidResponse(format!("failed to encode params: {e}")))?;

        let params = multipart::Part::text(params)
            .mime_str("application/json")
            .map_err(|e| ImageGenError::ConnectionError(e.to_string()))?;

        let form = multipart::Form::new()
            .text("model_id", model_id.to_string())
            .part("params", params);

        let job: Job = self
            .send(self.client.post(self.url("text2image/run")).multipart(form))
            .await?
            .json()
            .await
            .map_err(|e| ImageGenError::from_reqwest(&e))?;

        if job.uuid.is_empty() {
            return Err(ImageGenError::InvalidResponse("no uuid in response".to_owned()));
        }

        Ok(job.uuid)
    }

    async fn job_status(&self, uuid: &str) -> Result<Option<Vec<u8>>> {
        let status: JobStatus = self
            .send(self.client.get(self.url(&format!("text2image/status/{uuid}"))))
            .await?
            .json()
            .await
            .map_err(|e| ImageGenError::from_reqwest(&e))?;

        match status.status.as_str() {
            "DONE" => {
                let image = status
                    .images
                    .first()
                    .ok_or_else(|| ImageGenError::GenerationFailed("job finished without images".to_owned()))?;
                decode_image(image).map(Some)
            }
            "FAIL" => Err(ImageGenError::GenerationFailed(
                status.error_description.unwrap_or_else(|| "unknown error".to_owned()),
            )),
            _ => Ok(None),
        }
    }

    async fn run_job(&self, prompt: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let uuid = cancellable(cancel, async {
            let model_id = self.model_id().await?;
            self.check_availability(model_id).await?;
            self.start_job(model_id, prompt).await
        })
        .await??;

        tracing::debug!(provider = %self.name, uuid = %uuid, "generation job started");

        let uuid = uuid.as_str();
        self.poll.run(&self.name, cancel, move || self.job_status(uuid)).await
    }
}

#[derive(Deserialize)]
struct Model {
    id: u64,
}

#[derive(Deserialize)]
struct Availability {
    #[serde(default)]
    model_status: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateParams<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    num_images: u32,
    width: u32,
    height: u32,
    generate_params: Query<'a>,
}

#[derive(Serialize)]
struct Query<'a> {
    query: &'a str,
}

#[derive(Deserialize)]
struct Job {
    #[serde(default)]
    uuid: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[async_trait]
impl GenerationProvider for FusionBrainProvider {
    async fn generate(&self, prompt: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let start = Instant::now();

        tracing::debug!(provider = %self.name, prompt_length = prompt.len(), "starting FusionBrain generation");

        let result = self.run_job(prompt, cancel).await;

        muse_telemetry::metrics::record_provider_duration(&self.name, start);
        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}
