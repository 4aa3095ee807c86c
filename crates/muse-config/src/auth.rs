use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// IAM bearer token configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Long-lived OAuth token exchanged for short-lived IAM tokens
    pub oauth_token: SecretString,
    /// Token exchange endpoint
    #[serde(default = "default_iam_url")]
    pub iam_url: Url,
    /// Background refresh period
    #[serde(default = "default_refresh_interval", deserialize_with = "crate::duration::deserialize")]
    pub refresh_interval: Duration,
    /// How long a freshly issued token is trusted
    #[serde(default = "default_token_ttl", deserialize_with = "crate::duration::deserialize")]
    pub token_ttl: Duration,
}

fn default_iam_url() -> Url {
    Url::parse("https://iam.api.cloud.yandex.net/iam/v1/tokens").expect("must be a valid URL")
}

#[allow(clippy::missing_const_for_fn)]
fn default_refresh_interval() -> Duration {
    Duration::from_secs(50 * 60)
}

#[allow(clippy::missing_const_for_fn)]
fn default_token_ttl() -> Duration {
    Duration::from_secs(11 * 60 * 60)
}
