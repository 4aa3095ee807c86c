use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use muse_config::AuthConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{AuthError, Result};

/// A freshly issued bearer token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Token value sent as `Authorization: Bearer ...`
    pub value: SecretString,
    /// Expiry reported by the issuer, if any
    pub expires_at: Option<Timestamp>,
}

impl IssuedToken {
    /// Create a token with no issuer-reported expiry
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: SecretString::from(value.into()),
            expires_at: None,
        }
    }

    /// How long this token can be trusted, capped at `ttl`
    ///
    /// An issuer-reported expiry shortens the window; one already in the
    /// past yields zero so the token is never served from cache.
    pub(crate) fn valid_for(&self, ttl: Duration) -> Duration {
        let Some(expires_at) = self.expires_at else {
            return ttl;
        };

        let remaining = Duration::try_from(expires_at.duration_since(Timestamp::now())).unwrap_or_default();
        remaining.min(ttl)
    }
}

/// Collaborator that exchanges long-lived credentials for a bearer token
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Fetch a new token
    ///
    /// Returns [`AuthError::Unauthorized`] when the issuer rejects the
    /// underlying credentials.
    async fn fetch_token(&self) -> Result<IssuedToken>;
}

/// Exchanges an OAuth token for a short-lived IAM token
pub struct IamTokenIssuer {
    http: reqwest::Client,
    url: Url,
    oauth_token: SecretString,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IamTokenRequest<'a> {
    yandex_passport_oauth_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IamTokenResponse {
    iam_token: String,
    #[serde(default)]
    expires_at: Option<Timestamp>,
}

impl IamTokenIssuer {
    /// Create a new issuer
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new(url: Url, oauth_token: SecretString) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            http,
            url,
            oauth_token,
        })
    }

    /// Create an issuer from the `[auth]` configuration section
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        Self::new(config.iam_url.clone(), config.oauth_token.clone())
    }
}

#[async_trait]
impl TokenIssuer for IamTokenIssuer {
    async fn fetch_token(&self) -> Result<IssuedToken> {
        let body = IamTokenRequest {
            yandex_passport_oauth_token: self.oauth_token.expose_secret(),
        };

        let response = self.http.post(self.url.clone()).json(&body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => AuthError::Unauthorized(message),
                status => AuthError::Api { status, message },
            });
        }

        let token: IamTokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(format!("failed to parse response: {e}")))?;

        if token.iam_token.is_empty() {
            return Err(AuthError::InvalidResponse("empty iamToken".to_owned()));
        }

        tracing::debug!(expires_at = ?token.expires_at, "issued IAM token");

        Ok(IssuedToken {
            value: SecretString::from(token.iam_token),
            expires_at: token.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn issuer(server: &MockServer) -> IamTokenIssuer {
        let url = Url::parse(&format!("{}/iam/v1/tokens", server.uri())).unwrap();
        IamTokenIssuer::new(url, SecretString::from("y0_oauth".to_owned())).unwrap()
    }

    #[tokio::test]
    async fn exchanges_oauth_token() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/iam/v1/tokens"))
            .and(body_json(serde_json::json!({ "yandexPassportOauthToken": "y0_oauth" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "iamToken": "t1.iam",
                "expiresAt": "2099-01-01T00:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = issuer(&server).fetch_token().await.unwrap();

        assert_eq!(token.value.expose_secret(), "t1.iam");
        assert_eq!(token.expires_at, Some("2099-01-01T00:00:00Z".parse().unwrap()));
    }

    #[tokio::test]
    async fn rejected_credentials_are_unauthorized() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad oauth token"))
            .mount(&server)
            .await;

        let err = issuer(&server).fetch_token().await.unwrap_err();

        assert!(matches!(err, AuthError::Unauthorized(ref m) if m == "bad oauth token"));
    }

    #[tokio::test]
    async fn server_error_keeps_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = issuer(&server).fetch_token().await.unwrap_err();

        assert!(matches!(err, AuthError::Api { status: 503, .. }));
    }

    #[tokio::test]
    async fn missing_token_field_is_invalid() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": "x" })))
            .mount(&server)
            .await;

        let err = issuer(&server).fetch_token().await.unwrap_err();

        assert!(matches!(err, AuthError::InvalidResponse(_)));
    }

    #[test]
    fn reported_expiry_bounds_validity() {
        let ttl = Duration::from_secs(3600);

        assert_eq!(IssuedToken::new("a").valid_for(ttl), ttl);

        let soon = IssuedToken {
            expires_at: Some(Timestamp::now() + jiff::SignedDuration::from_secs(60)),
            ..IssuedToken::new("b")
        };
        assert!(soon.valid_for(ttl) <= Duration::from_secs(60));

        let expired = IssuedToken {
            expires_at: Some(Timestamp::now() - jiff::SignedDuration::from_secs(60)),
            ..IssuedToken::new("c")
        };
        assert_eq!(expired.valid_for(ttl), Duration::ZERO);
    }
}
