use std::time::Duration;

use async_trait::async_trait;
use muse_auth::CredentialCache;
use muse_config::PromptConfig;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::EnhanceError;

/// Default Foundation Models API base URL
const DEFAULT_BASE_URL: &str = "https://llm.api.cloud.yandex.net";

const COMPLETION_PATH: &str = "/foundationModels/v1/completion";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const SYSTEM_PROMPT: &str = "You are a meme editor and stand-up comedian in one. \
Turn the short meme description you are given into a topical, ironic and memorable joke with: \
a short setup that hints at pop culture, a trend or an everyday problem; \
a humorous twist built on absurdity, hyperbole or contrast; \
an unexpected reference such as a historical fact, a celebrity or a household detail; \
and a final one- or two-line caption to print on the picture. \
Answer with JSON only: {\"context\": \"setup\", \"detail\": \"witty detail\", \"caption\": \"caption\"}";

/// Result of prompt enhancement
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Enhancement {
    /// Prompt to send to the image providers
    pub prompt: String,
    /// Caption for the finished image, possibly empty
    pub caption: String,
}

impl Enhancement {
    /// The user's prompt unchanged, without a caption
    pub fn passthrough(prompt: &str) -> Self {
        Self {
            prompt: prompt.to_owned(),
            caption: String::new(),
        }
    }
}

/// Rewrites a user prompt into a richer image prompt plus caption
///
/// Implementations never fail: on any error they return
/// [`Enhancement::passthrough`].
#[async_trait]
pub trait PromptEnhancer: Send + Sync {
    async fn enhance(&self, prompt: &str) -> Enhancement;
}

/// Used when prompt enhancement is not configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEnhancement;

#[async_trait]
impl PromptEnhancer for NoEnhancement {
    async fn enhance(&self, prompt: &str) -> Enhancement {
        Enhancement::passthrough(prompt)
    }
}

/// Prompt enhancement through the `YandexGPT` completion API
pub struct YandexGptEnhancer {
    client: Client,
    credentials: CredentialCache,
    url: String,
    folder_id: String,
    model_uri: String,
    temperature: f64,
    max_tokens: u32,
}

impl YandexGptEnhancer {
    pub fn new(config: &PromptConfig, credentials: CredentialCache) -> Result<Self, EnhanceError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(client, config, credentials))
    }

    pub fn with_client(client: Client, config: &PromptConfig, credentials: CredentialCache) -> Self {
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);

        Self {
            client,
            credentials,
            url: format!("{}{COMPLETION_PATH}", base_url.trim_end_matches('/')),
            folder_id: config.folder_id.clone(),
            model_uri: format!("gpt://{}/{}", config.folder_id, config.model),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    async fn complete(&self, prompt: &str) -> Result<Enhancement, EnhanceError> {
        let user_text = format!(
            "Write a short meme description on the topic: {prompt}. Describe the main elements, colors and mood."
        );

        let max_tokens = self.max_tokens.to_string();
        let request = CompletionRequest {
            model_uri: &self.model_uri,
            completion_options: CompletionOptions {
                stream: false,
                temperature: self.temperature,
                max_tokens: &max_tokens,
            },
            messages: [
                CompletionMessage {
                    role: "system",
                    text: SYSTEM_PROMPT,
                },
                CompletionMessage {
                    role: "user",
                    text: &user_text,
                },
            ],
        };

        let response = self
            .credentials
            .with_token(|token| self.send(&request, token))
            .await?;

        let text = response
            .result
            .alternatives
            .into_iter()
            .next()
            .map(|a| a.message.text)
            .ok_or_else(|| EnhanceError::InvalidResponse("no alternatives".to_owned()))?;

        parse_enhancement(&text)
    }

    async fn send(&self, request: &CompletionRequest<'_>, token: SecretString) -> Result<CompletionResponse, EnhanceError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(token.expose_secret())
            .header("x-folder-id", &self.folder_id)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => EnhanceError::Unauthorized(message),
                status => EnhanceError::Api { status, message },
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl PromptEnhancer for YandexGptEnhancer {
    async fn enhance(&self, prompt: &str) -> Enhancement {
        match self.complete(prompt).await {
            Ok(enhancement) => {
                tracing::debug!(
                    original_length = prompt.len(),
                    enhanced_length = enhancement.prompt.len(),
                    caption = %enhancement.caption,
                    "prompt enhanced"
                );
                enhancement
            }
            Err(e) => {
                tracing::warn!(error = %e, "prompt enhancement failed, using original prompt");
                Enhancement::passthrough(prompt)
            }
        }
    }
}

/// Parse the model's JSON answer, tolerating Markdown code fences
fn parse_enhancement(text: &str) -> Result<Enhancement, EnhanceError> {
    let trimmed = text.trim().trim_matches('`');
    let trimmed = trimmed.strip_prefix("json").unwrap_or(trimmed).trim();

    let parsed: MemeIdea = serde_json::from_str(trimmed)
        .map_err(|e| EnhanceError::InvalidResponse(format!("completion is not the expected JSON: {e}")))?;

    Ok(Enhancement {
        prompt: format!("{}\n\n{}", parsed.context, parsed.detail),
        caption: parsed.caption,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionRequest<'a> {
    model_uri: &'a str,
    completion_options: CompletionOptions<'a>,
    messages: [CompletionMessage<'a>; 2],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionOptions<'a> {
    stream: bool,
    temperature: f64,
    max_tokens: &'a str,
}

#[derive(Serialize)]
struct CompletionMessage<'a> {
    role: &'static str,
    text: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    result: CompletionResult,
}

#[derive(Deserialize)]
struct CompletionResult {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Deserialize)]
struct Alternative {
    message: AlternativeMessage,
}

#[derive(Deserialize)]
struct AlternativeMessage {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct MemeIdea {
    #[serde(default)]
    context: String,
    #[serde(default)]
    detail: String,
    #[serde(default)]
    caption: String,
}
