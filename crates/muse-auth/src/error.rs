pub type Result<T> = std::result::Result<T, AuthError>;

/// Token issuing errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The issuer rejected the supplied credentials
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// HTTP request to the issuer failed
    #[error("token request failed: {0}")]
    Connection(#[from] reqwest::Error),

    /// The issuer returned a non-success response
    #[error("token issuer error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from the issuer
        message: String,
    },

    /// The issuer answered with something that is not a token
    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

/// Errors that can signal a rejected bearer token
///
/// [`crate::CredentialCache::with_token`] uses this to decide whether
/// the cached token should be dropped and the call retried.
pub trait IsUnauthorized {
    fn is_unauthorized(&self) -> bool;
}

impl IsUnauthorized for AuthError {
    fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}
