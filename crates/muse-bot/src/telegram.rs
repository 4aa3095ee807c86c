use std::time::Duration;

use muse_config::BotConfig;
use reqwest::{Client, RequestBuilder, multipart};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TelegramError};

/// Added on top of the long-poll timeout so the HTTP client never gives up first
const POLL_SLACK: Duration = Duration::from_secs(15);

/// File name Telegram shows for uploaded images
const PHOTO_FILE_NAME: &str = "meme.png";

/// Minimal Telegram Bot API client
#[derive(Clone)]
pub struct TelegramClient {
    http: Client,
    api_url: String,
    token: SecretString,
}

impl TelegramClient {
    /// Create a client for the Bot API at `api_url`
    ///
    /// `poll_timeout` is the longest `getUpdates` wait this client will be
    /// asked to perform.
    pub fn new(api_url: &str, token: SecretString, poll_timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(poll_timeout + POLL_SLACK).build()?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_owned(),
            token,
        })
    }

    pub fn from_config(config: &BotConfig) -> Result<Self> {
        Self::new(
            &config.api_url,
            config.telegram_token.clone(),
            Duration::from_secs(config.poll_timeout),
        )
    }

    fn method(&self, name: &str) -> RequestBuilder {
        // The token is part of the path, so this URL must never be logged
        self.http
            .post(format!("{}/bot{}/{name}", self.api_url, self.token.expose_secret()))
    }

    async fn call<T: DeserializeOwned>(&self, name: &str, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.map_err(reqwest::Error::without_url)?;
        let status = response.status();
        let body = response.text().await.map_err(reqwest::Error::without_url)?;

        let envelope: Envelope<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(TelegramError::Api {
                    code: i64::from(status.as_u16()),
                    description: body,
                });
            }
            Err(e) => return Err(TelegramError::InvalidResponse(format!("{name}: {e}"))),
        };

        if !envelope.ok {
            return Err(TelegramError::Api {
                code: envelope.error_code.unwrap_or_else(|| i64::from(status.as_u16())),
                description: envelope.description.unwrap_or_default(),
            });
        }

        envelope
            .result
            .ok_or_else(|| TelegramError::InvalidResponse(format!("{name}: missing result")))
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>> {
        let request = self.method("getUpdates").json(&GetUpdates {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates: &["message"],
        });

        self.call("getUpdates", request).await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Message> {
        let request = self.method("sendMessage").json(&SendMessage { chat_id, text });

        self.call("sendMessage", request).await
    }

    /// Upload a PNG image, optionally with a caption
    pub async fn send_photo(&self, chat_id: i64, image: Vec<u8>, caption: Option<&str>) -> Result<Message> {
        if image.is_empty() {
            return Err(TelegramError::EmptyImage);
        }

        let photo = multipart::Part::bytes(image)
            .file_name(PHOTO_FILE_NAME)
            .mime_str("image/png")?;

        let mut form = multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", photo);

        if let Some(caption) = caption.filter(|c| !c.is_empty()) {
            form = form.text("caption", caption.to_owned());
        }

        self.call("sendPhoto", self.method("sendPhoto").multipart(form)).await
    }

    /// The bot's own account
    pub async fn get_me(&self) -> Result<User> {
        self.call("getMe", self.method("getMe")).await
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let request = self
            .method("deleteMessage")
            .json(&DeleteMessage { chat_id, message_id });

        let _: bool = self.call("deleteMessage", request).await?;
        Ok(())
    }
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

#[derive(Serialize)]
struct GetUpdates<'a> {
    offset: i64,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Serialize)]
struct DeleteMessage {
    chat_id: i64,
    message_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: String,
}

impl User {
    /// `@username` when set, otherwise the first name
    pub fn display_name(&self) -> String {
        self.username
            .as_ref()
            .map_or_else(|| self.first_name.clone(), |u| format!("@{u}"))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> TelegramClient {
        TelegramClient::new(&server.uri(), SecretString::from("123:abc".to_owned()), Duration::from_secs(1)).unwrap()
    }

    fn message_json(id: i64, text: &str) -> serde_json::Value {
        serde_json::json!({
            "message_id": id,
            "chat": { "id": 42, "type": "private" },
            "from": { "id": 7, "is_bot": false, "first_name": "Ada", "username": "ada" },
            "date": 1_700_000_000,
            "text": text
        })
    }

    #[tokio::test]
    async fn get_updates_sends_offset() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/bot123:abc/getUpdates"))
            .and(body_json(serde_json::json!({
                "offset": 10,
                "timeout": 1,
                "allowed_updates": ["message"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": [
                    { "update_id": 10, "message": message_json(1, "/meme cat") },
                    { "update_id": 11, "edited_message": message_json(2, "edited") }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let updates = client(&server).get_updates(10, Duration::from_secs(1)).await.unwrap();

        assert_eq!(updates.len(), 2);
        let message = updates[0].message.as_ref().unwrap();
        assert_eq!(message.text.as_deref(), Some("/meme cat"));
        assert_eq!(message.from.as_ref().unwrap().display_name(), "@ada");
        assert!(updates[1].message.is_none());
    }

    #[tokio::test]
    async fn api_error_uses_envelope() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: chat not found"
            })))
            .mount(&server)
            .await;

        let err = client(&server).send_message(1, "hi").await.unwrap_err();

        assert!(matches!(err, TelegramError::Api { code: 400, ref description } if description.contains("chat not found")));
    }

    #[tokio::test]
    async fn non_json_error_keeps_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&server)
            .await;

        let err = client(&server).send_message(1, "hi").await.unwrap_err();

        assert!(matches!(err, TelegramError::Api { code: 502, .. }));
    }

    #[tokio::test]
    async fn send_photo_uploads_multipart() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendPhoto"))
            .and(body_string_contains("filename=\"meme.png\""))
            .and(body_string_contains("a caption"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": message_json(5, "")
            })))
            .expect(1)
            .mount(&server)
            .await;

        let message = client(&server)
            .send_photo(42, b"PNG".to_vec(), Some("a caption"))
            .await
            .unwrap();

        assert_eq!(message.message_id, 5);
    }

    #[tokio::test]
    async fn empty_photo_is_not_sent() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client(&server).send_photo(42, Vec::new(), None).await.unwrap_err();

        assert!(matches!(err, TelegramError::EmptyImage));
    }

    #[tokio::test]
    async fn delete_message_accepts_bool_result() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/bot123:abc/deleteMessage"))
            .and(body_json(serde_json::json!({ "chat_id": 42, "message_id": 9 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true, "result": true })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).delete_message(42, 9).await.unwrap();
    }

    #[tokio::test]
    async fn get_me_returns_bot_account() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/bot123:abc/getMe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": { "id": 99, "is_bot": true, "first_name": "Muse", "username": "muse_meme_bot" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let me = client(&server).get_me().await.unwrap();
        assert_eq!(me.id, 99);
        assert_eq!(me.username.as_deref(), Some("muse_meme_bot"));
    }
}
