use async_trait::async_trait;

use crate::error::Result;
use crate::telegram::TelegramClient;

/// Outbound side of a chat
///
/// Calls do not watch a cancellation token themselves; handlers race them
/// against the command's token.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Send a text message and return its id
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64>;

    /// Send an image; an empty `caption` sends none
    async fn send_image(&self, chat_id: i64, image: Vec<u8>, caption: &str) -> Result<()>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()>;
}

#[async_trait]
impl ReplySink for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64> {
        Ok(self.send_message(chat_id, text).await?.message_id)
    }

    async fn send_image(&self, chat_id: i64, image: Vec<u8>, caption: &str) -> Result<()> {
        self.send_photo(chat_id, image, Some(caption)).await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        TelegramClient::delete_message(self, chat_id, message_id).await
    }
}
