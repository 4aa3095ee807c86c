use muse_auth::{AuthError, IsUnauthorized};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ImageGenError>;

/// Image generation errors
#[derive(Debug, Error)]
pub enum ImageGenError {
    /// The provider rejected our credentials
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Bearer token could not be obtained
    #[error("Credential error: {0}")]
    Credentials(#[from] AuthError),

    /// Provider API returned an error
    #[error("Provider API error ({status}): {message}")]
    ProviderApiError { status: u16, message: String },

    /// Network or connection error
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Provider answered with something we cannot use
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Provider accepted the job but reported that it failed
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// Job did not finish within the polling budget
    #[error("Generation did not finish after {attempts} status checks")]
    PollExhausted { attempts: u32 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The caller cancelled the request
    #[error("Generation cancelled")]
    Cancelled,

    /// The request deadline passed before any provider succeeded
    #[error("Generation deadline exceeded")]
    DeadlineExceeded,

    /// Every provider failed
    #[error("{}", summarize(failures))]
    AllProvidersFailed { failures: Vec<ProviderFailure> },

    /// No providers are configured
    #[error("No image generation providers configured")]
    NoProviders,
}

/// Failure of a single provider attempt inside a race
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: ImageGenError,
}

fn summarize(failures: &[ProviderFailure]) -> String {
    match failures.first() {
        Some(first) => format!(
            "All {} image providers failed; first: {}: {}",
            failures.len(),
            first.provider,
            first.error
        ),
        None => "All image providers failed".to_owned(),
    }
}

impl ImageGenError {
    /// True for cancellation and deadline expiry
    ///
    /// Lets callers tell "timed out" apart from "every backend broke".
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Whether a status poll that failed this way is worth repeating
    pub(crate) fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionError(_) => true,
            Self::ProviderApiError { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::ConnectionError(e.to_string())
        }
    }
}

impl IsUnauthorized for ImageGenError {
    fn is_unauthorized(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_))
    }
}
