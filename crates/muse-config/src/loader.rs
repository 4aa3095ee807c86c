use std::path::Path;
use std::time::Duration;

use secrecy::ExposeSecret;

use crate::{Config, ImageGenProviderType};

/// Upper bound for a single command's processing deadline
const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(60 * 60);

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::parse(&raw)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if expansion, parsing, or validation fails
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error describing the first inconsistency found
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_bot()?;
        self.validate_dispatch()?;
        self.validate_auth()?;
        self.validate_imagegen()?;
        self.validate_prompt()?;
        Ok(())
    }

    fn validate_bot(&self) -> anyhow::Result<()> {
        if self.bot.telegram_token.expose_secret().is_empty() {
            anyhow::bail!("bot.telegram_token must not be empty");
        }

        Ok(())
    }

    fn validate_dispatch(&self) -> anyhow::Result<()> {
        let dispatch = &self.dispatch;

        if dispatch.workers == 0 {
            anyhow::bail!("dispatch.workers must be at least 1");
        }

        if dispatch.command_timeout.is_zero() || dispatch.command_timeout > MAX_COMMAND_TIMEOUT {
            anyhow::bail!("dispatch.command_timeout must be between 1s and 1h");
        }

        if dispatch.reply_grace.is_zero() {
            anyhow::bail!("dispatch.reply_grace must be greater than 0 so timed-out commands can reply");
        }

        Ok(())
    }

    fn validate_auth(&self) -> anyhow::Result<()> {
        let Some(ref auth) = self.auth else {
            return Ok(());
        };

        if auth.oauth_token.expose_secret().is_empty() {
            anyhow::bail!("auth.oauth_token must not be empty");
        }

        if auth.refresh_interval.is_zero() {
            anyhow::bail!("auth.refresh_interval must be greater than 0");
        }

        if auth.token_ttl <= auth.refresh_interval {
            anyhow::bail!("auth.token_ttl must be longer than auth.refresh_interval");
        }

        Ok(())
    }

    fn validate_imagegen(&self) -> anyhow::Result<()> {
        if self.imagegen.providers.is_empty() {
            anyhow::bail!("at least one image generation provider must be configured");
        }

        for (name, provider) in &self.imagegen.providers {
            match provider.provider_type {
                ImageGenProviderType::YandexArt => {
                    if self.auth.is_none() {
                        anyhow::bail!("provider '{name}' (yandex_art) requires an [auth] section");
                    }
                    if provider.folder_id.as_deref().is_none_or(str::is_empty) {
                        anyhow::bail!("provider '{name}' (yandex_art) requires folder_id");
                    }
                }
                ImageGenProviderType::FusionBrain => {
                    if provider.api_key.is_none() || provider.secret_key.is_none() {
                        anyhow::bail!("provider '{name}' (fusion_brain) requires api_key and secret_key");
                    }
                }
                ImageGenProviderType::Cloudflare => {
                    if provider.base_url.is_none() {
                        anyhow::bail!("provider '{name}' (cloudflare) requires base_url");
                    }
                }
            }

            if provider.max_polls == Some(0) {
                anyhow::bail!("provider '{name}': max_polls must be greater than 0");
            }
        }

        Ok(())
    }

    fn validate_prompt(&self) -> anyhow::Result<()> {
        if self.prompt.is_some() && self.auth.is_none() {
            anyhow::bail!("prompt enhancement requires an [auth] section");
        }

        Ok(())
    }
}
