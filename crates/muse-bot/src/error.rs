use muse_auth::{AuthError, IsUnauthorized};

pub type Result<T> = std::result::Result<T, TelegramError>;

/// Bot API errors
#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    /// HTTP request failed before a response arrived
    #[error("Telegram request failed: {0}")]
    Connection(#[from] reqwest::Error),

    /// The Bot API answered with `ok: false`
    #[error("Telegram API error ({code}): {description}")]
    Api {
        /// `error_code` from the envelope, or the HTTP status
        code: i64,
        description: String,
    },

    /// The response body was not a Bot API envelope
    #[error("invalid Telegram response: {0}")]
    InvalidResponse(String),

    /// Refused to upload a zero-length image
    #[error("image is empty")]
    EmptyImage,
}

/// Errors from the prompt completion endpoint
///
/// Never surfaced to users: the enhancer falls back to the original prompt.
#[derive(Debug, thiserror::Error)]
pub enum EnhanceError {
    #[error(transparent)]
    Credentials(#[from] AuthError),

    #[error("completion request rejected: {0}")]
    Unauthorized(String),

    #[error("completion API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("completion request failed: {0}")]
    Connection(#[from] reqwest::Error),

    #[error("unusable completion: {0}")]
    InvalidResponse(String),
}

impl IsUnauthorized for EnhanceError {
    fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}
