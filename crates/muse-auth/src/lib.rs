#![allow(clippy::missing_errors_doc)]

mod cache;
mod error;
mod issuer;

pub use cache::CredentialCache;
pub use error::{AuthError, IsUnauthorized, Result};
pub use issuer::{IamTokenIssuer, IssuedToken, TokenIssuer};
