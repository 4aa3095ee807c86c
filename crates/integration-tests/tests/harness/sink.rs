//! Reply sink that records everything the bot sends

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use muse_bot::{ReplySink, Result};

/// One outbound chat action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text { chat_id: i64, text: String },
    Image { chat_id: i64, image: Vec<u8>, caption: String },
    Deleted { chat_id: i64, message_id: i64 },
}

/// In-memory [`ReplySink`]
#[derive(Default)]
pub struct RecordingSink {
    replies: Mutex<Vec<Reply>>,
    /// When set, every text send hangs for this long first
    text_delay: Option<Duration>,
}

impl RecordingSink {
    /// A sink whose text messages take `delay` to go out
    pub fn with_text_delay(delay: Duration) -> Self {
        Self {
            text_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn replies(&self) -> Vec<Reply> {
        self.replies.lock().unwrap().clone()
    }

    /// Images sent to `chat_id`
    pub fn images(&self, chat_id: i64) -> Vec<Vec<u8>> {
        self.replies()
            .into_iter()
            .filter_map(|r| match r {
                Reply::Image { chat_id: c, image, .. } if c == chat_id => Some(image),
                _ => None,
            })
            .collect()
    }

    /// Text messages sent to `chat_id`
    pub fn texts(&self, chat_id: i64) -> Vec<String> {
        self.replies()
            .into_iter()
            .filter_map(|r| match r {
                Reply::Text { chat_id: c, text } if c == chat_id => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64> {
        if let Some(delay) = self.text_delay {
            tokio::time::sleep(delay).await;
        }

        let mut replies = self.replies.lock().unwrap();
        replies.push(Reply::Text {
            chat_id,
            text: text.to_owned(),
        });
        Ok(i64::try_from(replies.len()).unwrap())
    }

    async fn send_image(&self, chat_id: i64, image: Vec<u8>, caption: &str) -> Result<()> {
        self.replies.lock().unwrap().push(Reply::Image {
            chat_id,
            image,
            caption: caption.to_owned(),
        });
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        self.replies
            .lock()
            .unwrap()
            .push(Reply::Deleted { chat_id, message_id });
        Ok(())
    }
}
