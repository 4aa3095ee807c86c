#![allow(clippy::must_use_candidate)]

pub mod auth;
pub mod bot;
pub mod dispatch;
mod duration;
mod env;
pub mod health;
pub mod imagegen;
mod loader;
pub mod prompt;
pub mod telemetry;

use serde::Deserialize;

pub use auth::*;
pub use bot::*;
pub use dispatch::*;
pub use health::*;
pub use imagegen::*;
pub use prompt::*;
pub use telemetry::TelemetryConfig;

/// Top-level muse configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Chat transport configuration
    pub bot: BotConfig,
    /// Command admission and shutdown configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Bearer token issuing configuration
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    /// Image generation providers
    #[serde(default)]
    pub imagegen: ImageGenConfig,
    /// Prompt enhancement configuration
    #[serde(default)]
    pub prompt: Option<PromptConfig>,
    /// Liveness and readiness endpoints
    #[serde(default)]
    pub health: HealthConfig,
    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}

impl Config {
    /// Resolve the effective log filter
    ///
    /// An explicit override wins, then `telemetry.log_filter`, then the
    /// bot debug switch, falling back to `info`
    pub fn log_filter(&self, override_filter: Option<&str>) -> String {
        if let Some(filter) = override_filter {
            return filter.to_owned();
        }

        if let Some(filter) = self.telemetry.as_ref().and_then(|t| t.log_filter.as_deref()) {
            return filter.to_owned();
        }

        if self.bot.debug { "debug" } else { "info" }.to_owned()
    }
}
