use std::time::Duration;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;

/// Top-level image generation configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageGenConfig {
    /// How configured providers are combined for a single request
    #[serde(default)]
    pub policy: CombinePolicy,
    /// Cancel still-running providers once one of them has succeeded
    #[serde(default)]
    pub cancel_losers: bool,
    /// Provider configurations keyed by name, in fallback order
    #[serde(default)]
    pub providers: IndexMap<String, ImageGenProviderConfig>,
}

/// Strategy for combining several providers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinePolicy {
    /// Start every provider at once; the first success wins
    #[default]
    Race,
    /// Try providers one by one in configuration order
    Fallback,
}

/// Configuration for a single image generation provider
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageGenProviderConfig {
    /// Provider type
    #[serde(rename = "type")]
    pub provider_type: ImageGenProviderType,
    /// Cloud folder the generation model is billed to
    #[serde(default)]
    pub folder_id: Option<String>,
    /// API key
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// API secret, for providers that sign with a key pair
    #[serde(default)]
    pub secret_key: Option<SecretString>,
    /// Base URL override (required for `cloudflare`, the worker URL)
    #[serde(default)]
    pub base_url: Option<String>,
    /// Delay between job status polls
    #[serde(default, deserialize_with = "crate::duration::deserialize_option")]
    pub poll_interval: Option<Duration>,
    /// Maximum number of status polls before giving up
    #[serde(default)]
    pub max_polls: Option<u32>,
    /// Diffusion steps, for providers that accept them
    #[serde(default)]
    pub steps: Option<u32>,
}

/// Supported image generation providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageGenProviderType {
    /// Yandex ART async generation with operation polling
    YandexArt,
    /// Kandinsky via the `FusionBrain` API
    FusionBrain,
    /// Cloudflare Workers AI behind a custom worker
    Cloudflare,
}

impl ImageGenProviderType {
    /// Stable name used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            Self::YandexArt => "yandex_art",
            Self::FusionBrain => "fusion_brain",
            Self::Cloudflare => "cloudflare",
        }
    }
}
