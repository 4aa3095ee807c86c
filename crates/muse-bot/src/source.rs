use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use muse_dispatch::{Command, InboundSource, ReplyTarget};
use tokio_util::sync::CancellationToken;

use crate::telegram::{Message, TelegramClient};

/// Wait before polling again after a failed `getUpdates`
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Long-polls the Bot API and yields bot commands
///
/// Plain messages and non-message updates are acknowledged and skipped.
pub struct TelegramSource {
    client: TelegramClient,
    poll_timeout: Duration,
    offset: i64,
    pending: VecDeque<Command>,
    bot_username: Option<String>,
    stop: CancellationToken,
}

impl TelegramSource {
    pub fn new(client: TelegramClient, poll_timeout: Duration) -> Self {
        Self {
            client,
            poll_timeout,
            offset: 0,
            pending: VecDeque::new(),
            bot_username: None,
            stop: CancellationToken::new(),
        }
    }

    /// Ignore `/command@other_bot` addressed to a different bot
    #[must_use]
    pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
        self.bot_username = Some(username.into());
        self
    }

    fn enqueue(&mut self, message: &Message) {
        let Some((name, argument)) = message
            .text
            .as_deref()
            .and_then(|text| parse_command(text, self.bot_username.as_deref()))
        else {
            return;
        };

        let target = ReplyTarget {
            chat_id: message.chat.id,
            message_id: Some(message.message_id),
            user: message.from.as_ref().map(crate::telegram::User::display_name),
        };

        tracing::info!(
            command = %name,
            chat_id = target.chat_id,
            user = target.user.as_deref().unwrap_or_default(),
            "received command"
        );

        self.pending.push_back(Command::new(name, argument, target));
    }
}

#[async_trait]
impl InboundSource for TelegramSource {
    async fn recv(&mut self) -> Option<Command> {
        loop {
            if self.stop.is_cancelled() {
                return None;
            }

            if let Some(command) = self.pending.pop_front() {
                return Some(command);
            }

            let polled = tokio::select! {
                biased;
                () = self.stop.cancelled() => return None,
                polled = self.client.get_updates(self.offset, self.poll_timeout) => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        self.offset = self.offset.max(update.update_id + 1);
                        if let Some(message) = &update.message {
                            self.enqueue(message);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to poll updates, retrying");

                    tokio::select! {
                        () = self.stop.cancelled() => return None,
                        () = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }
    }

    fn stop(&mut self) {
        if !self.stop.is_cancelled() {
            tracing::info!("stopping Telegram polling");
            self.stop.cancel();
        }
    }
}

/// Split `/name[@bot] args` into name and trimmed argument
fn parse_command<'a>(text: &'a str, bot_username: Option<&str>) -> Option<(&'a str, &'a str)> {
    let rest = text.strip_prefix('/')?;
    let (head, argument) = rest
        .split_once(char::is_whitespace)
        .unwrap_or((rest, ""));

    let name = match head.split_once('@') {
        Some((name, addressee)) => {
            if bot_username.is_some_and(|bot| !bot.eq_ignore_ascii_case(addressee)) {
                return None;
            }
            name
        }
        None => head,
    };

    if name.is_empty() {
        return None;
    }

    Some((name, argument.trim()))
}
