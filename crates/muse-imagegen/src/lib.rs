#![allow(
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions
)]

mod builder;
mod error;
mod provider;
mod race;

pub use builder::GenerationRaceBuilder;
pub use error::{ImageGenError, ProviderFailure, Result};
pub use provider::cloudflare::CloudflareProvider;
pub use provider::fusion_brain::FusionBrainProvider;
pub use provider::yandex_art::YandexArtProvider;
pub use provider::{GenerationProvider, PollSchedule};
pub use race::{GenerationRace, GenerationRequest};

/// Build the generation race from configuration
///
/// # Errors
///
/// Returns an error if a provider is misconfigured or none are configured
pub fn build_race(
    config: &muse_config::ImageGenConfig,
    credentials: Option<muse_auth::CredentialCache>,
) -> anyhow::Result<GenerationRace> {
    let mut builder = GenerationRaceBuilder::new(config);

    if let Some(credentials) = credentials {
        builder = builder.credentials(credentials);
    }

    builder
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to initialize image generation: {e}"))
}
