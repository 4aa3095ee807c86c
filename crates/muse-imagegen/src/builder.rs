use std::sync::Arc;
use std::time::Duration;

use muse_auth::CredentialCache;
use muse_config::{ImageGenConfig, ImageGenProviderConfig, ImageGenProviderType};
use secrecy::SecretString;

use crate::error::{ImageGenError, Result};
use crate::provider::{GenerationProvider, PollSchedule, cloudflare, fusion_brain, yandex_art};
use crate::race::GenerationRace;

/// Timeout for a single HTTP call to a provider
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for constructing the generation race from configuration
pub struct GenerationRaceBuilder<'a> {
    config: &'a ImageGenConfig,
    credentials: Option<CredentialCache>,
}

impl<'a> GenerationRaceBuilder<'a> {
    pub const fn new(config: &'a ImageGenConfig) -> Self {
        Self {
            config,
            credentials: None,
        }
    }

    /// Bearer token source for providers that need one
    #[must_use]
    pub fn credentials(mut self, credentials: CredentialCache) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn build(self) -> Result<GenerationRace> {
        // One pooled client shared by every provider
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ImageGenError::ConfigError(format!("failed to build HTTP client: {e}")))?;

        let mut providers: Vec<Arc<dyn GenerationProvider>> = Vec::with_capacity(self.config.providers.len());

        for (name, provider_config) in &self.config.providers {
            tracing::debug!(
                provider = %name,
                provider_type = provider_config.provider_type.as_str(),
                "initializing image generation provider"
            );

            let provider: Arc<dyn GenerationProvider> = match provider_config.provider_type {
                ImageGenProviderType::YandexArt => {
                    let credentials = self.credentials.clone().ok_or_else(|| {
                        ImageGenError::ConfigError(format!("provider '{name}' requires bearer token credentials"))
                    })?;
                    let folder_id = provider_config.folder_id.clone().ok_or_else(|| {
                        ImageGenError::ConfigError(format!("folder_id required for provider '{name}'"))
                    })?;

                    Arc::new(
                        yandex_art::YandexArtProvider::new(
                            name.clone(),
                            client.clone(),
                            credentials,
                            folder_id,
                            provider_config.base_url.clone(),
                        )
                        .with_poll_schedule(PollSchedule::from_config(provider_config, yandex_art::DEFAULT_POLL)),
                    )
                }
                ImageGenProviderType::FusionBrain => Arc::new(
                    fusion_brain::FusionBrainProvider::new(
                        name.clone(),
                        client.clone(),
                        require_secret(name, "api_key", provider_config.api_key.as_ref())?,
                        require_secret(name, "secret_key", provider_config.secret_key.as_ref())?,
                        provider_config.base_url.clone(),
                    )
                    .with_poll_schedule(PollSchedule::from_config(provider_config, fusion_brain::DEFAULT_POLL)),
                ),
                ImageGenProviderType::Cloudflare => Arc::new(cloudflare::CloudflareProvider::new(
                    name.clone(),
                    client.clone(),
                    require_url(name, provider_config)?,
                    provider_config.steps,
                )),
            };

            providers.push(provider);
        }

        if providers.is_empty() {
            return Err(ImageGenError::NoProviders);
        }

        tracing::info!(
            providers = providers.len(),
            policy = ?self.config.policy,
            cancel_losers = self.config.cancel_losers,
            "image generation initialized"
        );

        Ok(GenerationRace::new(providers)
            .with_policy(self.config.policy)
            .with_cancel_losers(self.config.cancel_losers))
    }
}

fn require_secret(name: &str, field: &str, value: Option<&SecretString>) -> Result<SecretString> {
    value
        .cloned()
        .ok_or_else(|| ImageGenError::ConfigError(format!("{field} required for provider '{name}'")))
}

fn require_url(name: &str, config: &ImageGenProviderConfig) -> Result<String> {
    config
        .base_url
        .clone()
        .ok_or_else(|| ImageGenError::ConfigError(format!("base_url required for provider '{name}'")))
}
