//! Programmatic configuration builder for integration tests

use std::time::Duration;

use indexmap::IndexMap;
use muse_config::{CombinePolicy, DispatchConfig, ImageGenConfig, ImageGenProviderConfig, ImageGenProviderType};

/// Builder for the image generation and dispatch sections
pub struct ConfigBuilder {
    imagegen: ImageGenConfig,
    dispatch: DispatchConfig,
}

impl ConfigBuilder {
    /// Create a new builder with no providers and default dispatch limits
    pub fn new() -> Self {
        Self {
            imagegen: ImageGenConfig {
                policy: CombinePolicy::Race,
                cancel_losers: false,
                providers: IndexMap::new(),
            },
            dispatch: DispatchConfig::default(),
        }
    }

    /// Add a worker-protocol provider pointed at a mock backend
    pub fn with_worker_provider(mut self, name: &str, url: &str) -> Self {
        self.imagegen.providers.insert(
            name.to_owned(),
            ImageGenProviderConfig {
                provider_type: ImageGenProviderType::Cloudflare,
                folder_id: None,
                api_key: None,
                secret_key: None,
                base_url: Some(url.to_owned()),
                poll_interval: None,
                max_polls: None,
                steps: None,
            },
        );
        self
    }

    pub fn with_policy(mut self, policy: CombinePolicy) -> Self {
        self.imagegen.policy = policy;
        self
    }

    pub fn with_cancel_losers(mut self) -> Self {
        self.imagegen.cancel_losers = true;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.dispatch.workers = workers;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch.command_timeout = timeout;
        self
    }

    pub fn with_reply_grace(mut self, grace: Duration) -> Self {
        self.dispatch.reply_grace = grace;
        self
    }

    pub fn build(self) -> (ImageGenConfig, DispatchConfig) {
        (self.imagegen, self.dispatch)
    }
}
