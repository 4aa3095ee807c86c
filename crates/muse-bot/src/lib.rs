#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

mod enhancer;
mod error;
mod handler;
mod reply;
mod source;
mod telegram;

pub use enhancer::{Enhancement, NoEnhancement, PromptEnhancer, YandexGptEnhancer};
pub use error::{EnhanceError, Result, TelegramError};
pub use handler::{BotHandler, DEFAULT_PROMPT};
pub use reply::ReplySink;
pub use source::TelegramSource;
pub use telegram::{Chat, Message, TelegramClient, Update, User};
