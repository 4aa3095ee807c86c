use std::time::Duration;

use serde::Deserialize;

/// Bounded command admission and shutdown settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    /// Maximum number of commands processed concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Processing deadline for a single command
    #[serde(default = "default_command_timeout", deserialize_with = "crate::duration::deserialize")]
    pub command_timeout: Duration,
    /// Extra time a handler gets after its deadline to deliver a reply
    #[serde(default = "default_reply_grace", deserialize_with = "crate::duration::deserialize")]
    pub reply_grace: Duration,
    /// How long shutdown waits for in-flight commands
    #[serde(default = "default_shutdown_grace", deserialize_with = "crate::duration::deserialize")]
    pub shutdown_grace: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            command_timeout: default_command_timeout(),
            reply_grace: default_reply_grace(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

#[allow(clippy::missing_const_for_fn)]
fn default_workers() -> usize {
    10
}

#[allow(clippy::missing_const_for_fn)]
fn default_command_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

#[allow(clippy::missing_const_for_fn)]
fn default_reply_grace() -> Duration {
    Duration::from_secs(15)
}

#[allow(clippy::missing_const_for_fn)]
fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}
