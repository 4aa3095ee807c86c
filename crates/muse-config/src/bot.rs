use secrecy::SecretString;
use serde::Deserialize;

/// Telegram transport configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BotConfig {
    /// Bot API token issued by `@BotFather`
    pub telegram_token: SecretString,
    /// Bot API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Long-poll timeout for `getUpdates`, in seconds
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout: u64,
    /// Bot username without the `@`; commands addressed to other bots are ignored
    #[serde(default)]
    pub username: Option<String>,
    /// Enable debug logging when no explicit filter is configured
    #[serde(default)]
    pub debug: bool,
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_owned()
}

#[allow(clippy::missing_const_for_fn)]
fn default_poll_timeout() -> u64 {
    30
}
