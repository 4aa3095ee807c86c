use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt as _;
use muse_config::CombinePolicy;
use muse_telemetry::metrics;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ImageGenError, ProviderFailure, Result};
use crate::provider::GenerationProvider;

/// A single prompt to turn into an image
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Give up waiting at this instant
    pub deadline: Option<Instant>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            deadline: None,
        }
    }

    #[must_use]
    pub const fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Result of one provider attempt, tagged with its provider
struct ProviderOutcome {
    provider: String,
    result: Result<Vec<u8>>,
}

/// Combines several providers into one image source
///
/// With [`CombinePolicy::Race`] every provider starts at once and the first
/// success wins. Providers still running after a win keep going and their
/// results are discarded, unless `cancel_losers` is set. Either way they stay
/// bounded by the caller's cancellation token. With
/// [`CombinePolicy::Fallback`] providers are tried one at a time in
/// configuration order.
pub struct GenerationRace {
    providers: Vec<Arc<dyn GenerationProvider>>,
    policy: CombinePolicy,
    cancel_losers: bool,
}

impl GenerationRace {
    pub fn new(providers: Vec<Arc<dyn GenerationProvider>>) -> Self {
        Self {
            providers,
            policy: CombinePolicy::Race,
            cancel_losers: false,
        }
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: CombinePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub const fn with_cancel_losers(mut self, cancel_losers: bool) -> Self {
        self.cancel_losers = cancel_losers;
        self
    }

    /// Names of the configured providers, in configuration order
    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|p| p.name())
    }

    pub const fn policy(&self) -> CombinePolicy {
        self.policy
    }

    /// Generate an image for the request
    ///
    /// Returns [`ImageGenError::Cancelled`] or
    /// [`ImageGenError::DeadlineExceeded`] when `cancel` fires or the
    /// deadline passes before any provider succeeds, and
    /// [`ImageGenError::AllProvidersFailed`] when every provider failed.
    pub async fn generate(&self, request: &GenerationRequest, cancel: &CancellationToken) -> Result<Vec<u8>> {
        if self.providers.is_empty() {
            return Err(ImageGenError::NoProviders);
        }

        let start = std::time::Instant::now();

        let result = match self.policy {
            CombinePolicy::Race => self.race(request, cancel).await,
            CombinePolicy::Fallback => self.fallback(request, cancel).await,
        };

        metrics::record_generation(start, result.is_ok());

        match &result {
            Ok(image) => tracing::info!(bytes = image.len(), elapsed = ?start.elapsed(), "image generated"),
            Err(e) => tracing::warn!(error = %e, elapsed = ?start.elapsed(), "image generation failed"),
        }

        result
    }

    async fn race(&self, request: &GenerationRequest, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let attempts = cancel.child_token();
        // Cancels the attempts if the race ends without a winner or is dropped
        let guard = attempts.clone().drop_guard();

        let total = self.providers.len();
        let (tx, mut rx) = mpsc::channel(total);
        let prompt: Arc<str> = Arc::from(request.prompt.as_str());

        for provider in &self.providers {
            let provider = Arc::clone(provider);
            let prompt = Arc::clone(&prompt);
            let token = attempts.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let result = attempt(provider.as_ref(), &prompt, &token).await;
                let outcome = ProviderOutcome {
                    provider: provider.name().to_owned(),
                    result,
                };
                // Capacity matches the provider count, so this never waits
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        let mut failures = Vec::with_capacity(total);

        loop {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ImageGenError::Cancelled),
                () = wait_for(request.deadline) => return Err(ImageGenError::DeadlineExceeded),
                outcome = rx.recv() => outcome,
            };

            let Some(ProviderOutcome { provider, result }) = outcome else {
                // Every sender is gone without reporting
                for name in self.provider_names() {
                    if !failures.iter().any(|f: &ProviderFailure| f.provider == name) {
                        failures.push(ProviderFailure {
                            provider: name.to_owned(),
                            error: ImageGenError::GenerationFailed("provider stopped without reporting".to_owned()),
                        });
                    }
                }
                return Err(ImageGenError::AllProvidersFailed { failures });
            };

            metrics::record_provider_outcome(&provider, result.is_ok());

            match result {
                Ok(image) => {
                    tracing::debug!(provider = %provider, failed = failures.len(), "provider won the race");
                    if !self.cancel_losers {
                        guard.disarm();
                    }
                    return Ok(image);
                }
                Err(error) => {
                    tracing::warn!(provider = %provider, error = %error, "provider failed");
                    failures.push(ProviderFailure { provider, error });

                    if failures.len() == total {
                        return Err(ImageGenError::AllProvidersFailed { failures });
                    }
                }
            }
        }
    }

    async fn fallback(&self, request: &GenerationRequest, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let attempts = cancel.child_token();
        let _guard = attempts.clone().drop_guard();

        let mut failures = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ImageGenError::Cancelled),
                () = wait_for(request.deadline) => return Err(ImageGenError::DeadlineExceeded),
                result = attempt(provider.as_ref(), &request.prompt, &attempts) => result,
            };

            metrics::record_provider_outcome(provider.name(), result.is_ok());

            match result {
                Ok(image) => return Ok(image),
                Err(error) => {
                    tracing::warn!(provider = %provider.name(), error = %error, "provider failed, trying next");
                    failures.push(ProviderFailure {
                        provider: provider.name().to_owned(),
                        error,
                    });
                }
            }
        }

        Err(ImageGenError::AllProvidersFailed { failures })
    }
}

/// Run one provider, turning a panic into an ordinary failure
async fn attempt(provider: &dyn GenerationProvider, prompt: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
    AssertUnwindSafe(provider.generate(prompt, cancel))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            tracing::error!(provider = %provider.name(), "provider panicked");
            Err(ImageGenError::GenerationFailed("provider panicked".to_owned()))
        })
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
