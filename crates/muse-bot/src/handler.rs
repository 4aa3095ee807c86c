use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use muse_dispatch::{Command, CommandContext, CommandHandler, ReplyTarget};
use muse_imagegen::{GenerationRace, GenerationRequest, ImageGenError};
use tokio::time::Instant;

use crate::enhancer::PromptEnhancer;
use crate::reply::ReplySink;

/// Used when `/meme` comes without a description
pub const DEFAULT_PROMPT: &str = "Come up with and describe a meme. Use any fantasy you like. \
Use current trending topics. Let it be a slightly philosophical meme.";

const WORKING_NOTICE: &str = "Generating your meme, please wait...";

const HELP_TEXT: &str = "Available commands:\n\
/meme [text] - generate a meme, optionally from a description\n\
/start - start the bot\n\
/help - show this message";

const UNKNOWN_TEXT: &str = "I don't know that command. Try /help";

const TIMEOUT_TEXT: &str = "Sorry, generating the meme took too long. Please try again later.";

const FAILURE_TEXT: &str = "Sorry, I couldn't generate a meme right now. Please try again later.";

const SEND_FAILURE_TEXT: &str = "Sorry, I couldn't send the image.";

/// Chat command handler for the bot
pub struct BotHandler {
    race: Arc<GenerationRace>,
    enhancer: Arc<dyn PromptEnhancer>,
    replies: Arc<dyn ReplySink>,
}

impl BotHandler {
    pub fn new(race: Arc<GenerationRace>, enhancer: Arc<dyn PromptEnhancer>, replies: Arc<dyn ReplySink>) -> Self {
        Self {
            race,
            enhancer,
            replies,
        }
    }

    async fn meme(&self, argument: &str, target: &ReplyTarget, ctx: &CommandContext) -> anyhow::Result<()> {
        let chat_id = target.chat_id;
        let prompt = if argument.is_empty() { DEFAULT_PROMPT } else { argument };

        let notice = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => anyhow::bail!("command cancelled before the progress notice was sent"),
            sent = self.replies.send_text(chat_id, WORKING_NOTICE) => sent.context("failed to send progress notice")?,
        };

        let started = Instant::now();

        let enhancement = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => None,
            enhancement = self.enhancer.enhance(prompt) => Some(enhancement),
        };

        let generated = match &enhancement {
            Some(enhancement) => {
                let request = GenerationRequest::new(&enhancement.prompt).with_deadline(ctx.deadline);
                self.race.generate(&request, &ctx.cancel).await
            }
            None => Err(ImageGenError::Cancelled),
        };

        if let Err(e) = self.replies.delete_message(chat_id, notice).await {
            tracing::warn!(error = %e, chat_id, message_id = notice, "failed to delete progress notice");
        }

        let image = match generated {
            Ok(image) if !image.is_empty() => image,
            Ok(_) => {
                self.reply(chat_id, FAILURE_TEXT).await;
                anyhow::bail!("image generation returned an empty image");
            }
            Err(e) => {
                let text = if e.is_timeout() { TIMEOUT_TEXT } else { FAILURE_TEXT };
                self.reply(chat_id, text).await;
                return Err(anyhow::Error::new(e).context("image generation failed"));
            }
        };

        let caption = enhancement.map(|e| e.caption).unwrap_or_default();

        let sent = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => None,
            sent = self.replies.send_image(chat_id, image, &caption) => Some(sent),
        };

        match sent {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                self.reply(chat_id, SEND_FAILURE_TEXT).await;
                return Err(anyhow::Error::new(e).context("failed to send image"));
            }
            None => {
                self.reply(chat_id, TIMEOUT_TEXT).await;
                anyhow::bail!("command cancelled while sending the image");
            }
        }

        tracing::info!(
            chat_id,
            user = target.user.as_deref().unwrap_or_default(),
            elapsed = ?started.elapsed(),
            "meme sent"
        );

        Ok(())
    }

    /// Best-effort text reply; failures are only logged
    ///
    /// Runs outside the command's cancellation token, so after a timeout it
    /// is bounded only by the dispatcher's reply grace.
    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.replies.send_text(chat_id, text).await {
            tracing::warn!(error = %e, chat_id, "failed to send reply");
        }
    }
}

#[async_trait]
impl CommandHandler for BotHandler {
    async fn handle(&self, command: Command, ctx: CommandContext) -> anyhow::Result<()> {
        let chat_id = command.target.chat_id;

        tracing::debug!(command = %command.name, chat_id, argument = %command.argument, "processing command");

        match command.name.as_str() {
            "meme" => self.meme(&command.argument, &command.target, &ctx).await,
            "help" => {
                self.replies
                    .send_text(chat_id, HELP_TEXT)
                    .await
                    .context("failed to send help message")?;
                Ok(())
            }
            "start" => {
                let user = command.target.user.as_deref().unwrap_or("there");
                let greeting = format!(
                    "Hi, {user}! I make memes. Use /meme [text] to create one, for example: /meme little red riding hood"
                );
                self.replies
                    .send_text(chat_id, &greeting)
                    .await
                    .context("failed to send greeting")?;
                Ok(())
            }
            _ => {
                self.replies
                    .send_text(chat_id, UNKNOWN_TEXT)
                    .await
                    .context("failed to send unknown command reply")?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use muse_imagegen::GenerationProvider;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::enhancer::{Enhancement, NoEnhancement};
    use crate::error::{Result, TelegramError};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Sent {
        Text(i64, String),
        Image(i64, usize, String),
        Deleted(i64, i64),
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<Sent>>,
        fail_images: bool,
        stall_images: bool,
        stall_texts: bool,
    }

    impl RecordingSink {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReplySink for RecordingSink {
        async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64> {
            if self.stall_texts {
                std::future::pending::<()>().await;
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(Sent::Text(chat_id, text.to_owned()));
            Ok(i64::try_from(sent.len()).unwrap())
        }

        async fn send_image(&self, chat_id: i64, image: Vec<u8>, caption: &str) -> Result<()> {
            if self.stall_images {
                std::future::pending::<()>().await;
            }
            if self.fail_images {
                return Err(TelegramError::Api {
                    code: 400,
                    description: "PHOTO_INVALID_DIMENSIONS".to_owned(),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Image(chat_id, image.len(), caption.to_owned()));
            Ok(())
        }

        async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
            self.sent.lock().unwrap().push(Sent::Deleted(chat_id, message_id));
            Ok(())
        }
    }

    /// Returns a fixed image after `delay`, or fails
    struct FixedProvider {
        delay: Duration,
        image: Option<Vec<u8>>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GenerationProvider for FixedProvider {
        async fn generate(&self, prompt: &str, _cancel: &CancellationToken) -> muse_imagegen::Result<Vec<u8>> {
            self.prompts.lock().unwrap().push(prompt.to_owned());
            tokio::time::sleep(self.delay).await;
            self.image
                .clone()
                .ok_or_else(|| ImageGenError::GenerationFailed("model overloaded".to_owned()))
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct CaptionEnhancer;

    #[async_trait]
    impl PromptEnhancer for CaptionEnhancer {
        async fn enhance(&self, prompt: &str) -> Enhancement {
            Enhancement {
                prompt: format!("enhanced {prompt}"),
                caption: "so true".to_owned(),
            }
        }
    }

    fn provider(delay_secs: u64, image: Option<&[u8]>) -> Arc<FixedProvider> {
        Arc::new(FixedProvider {
            delay: Duration::from_secs(delay_secs),
            image: image.map(<[u8]>::to_vec),
            prompts: Mutex::default(),
        })
    }

    fn handler(provider: Arc<FixedProvider>, enhancer: Arc<dyn PromptEnhancer>, sink: Arc<RecordingSink>) -> BotHandler {
        let race = GenerationRace::new(vec![provider as Arc<dyn GenerationProvider>]);
        BotHandler::new(Arc::new(race), enhancer, sink)
    }

    fn command(name: &str, argument: &str) -> Command {
        Command::new(
            name,
            argument,
            ReplyTarget {
                chat_id: 42,
                message_id: Some(1),
                user: Some("@ada".to_owned()),
            },
        )
    }

    fn context(timeout_secs: u64) -> CommandContext {
        CommandContext {
            cancel: CancellationToken::new(),
            deadline: Instant::now() + Duration::from_secs(timeout_secs),
        }
    }

    fn cancel_after(ctx: &CommandContext, secs: u64) {
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            cancel.cancel();
        });
    }

    #[tokio::test(start_paused = true)]
    async fn meme_sends_image_with_caption() {
        let sink = Arc::new(RecordingSink::default());
        let provider = provider(2, Some(b"PNG"));
        let handler = handler(provider.clone(), Arc::new(CaptionEnhancer), sink.clone());

        handler.handle(command("meme", "cats"), context(60)).await.unwrap();

        assert_eq!(
            sink.sent(),
            vec![
                Sent::Text(42, WORKING_NOTICE.to_owned()),
                Sent::Deleted(42, 1),
                Sent::Image(42, 3, "so true".to_owned()),
            ]
        );
        assert_eq!(*provider.prompts.lock().unwrap(), vec!["enhanced cats".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_meme_uses_default_prompt() {
        let sink = Arc::new(RecordingSink::default());
        let provider = provider(0, Some(b"PNG"));
        let handler = handler(provider.clone(), Arc::new(NoEnhancement), sink.clone());

        handler.handle(command("meme", ""), context(60)).await.unwrap();

        assert_eq!(*provider.prompts.lock().unwrap(), vec![DEFAULT_PROMPT.to_owned()]);
        assert!(sink.sent().contains(&Sent::Image(42, 3, String::new())));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_generation_reports_timeout() {
        let sink = Arc::new(RecordingSink::default());
        let handler = handler(provider(120, Some(b"PNG")), Arc::new(NoEnhancement), sink.clone());

        let err = handler.handle(command("meme", "cats"), context(5)).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ImageGenError>(),
            Some(ImageGenError::DeadlineExceeded)
        ));
        assert_eq!(sink.sent().last(), Some(&Sent::Text(42, TIMEOUT_TEXT.to_owned())));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_generation_reports_failure() {
        let sink = Arc::new(RecordingSink::default());
        let handler = handler(provider(1, None), Arc::new(NoEnhancement), sink.clone());

        let err = handler.handle(command("meme", "cats"), context(60)).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ImageGenError>(),
            Some(ImageGenError::AllProvidersFailed { .. })
        ));
        assert_eq!(sink.sent().last(), Some(&Sent::Text(42, FAILURE_TEXT.to_owned())));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_command_reports_timeout() {
        let sink = Arc::new(RecordingSink::default());
        let handler = handler(provider(120, Some(b"PNG")), Arc::new(NoEnhancement), sink.clone());

        let ctx = context(600);
        cancel_after(&ctx, 1);

        let err = handler.handle(command("meme", "cats"), ctx).await.unwrap_err();

        assert!(matches!(err.downcast_ref::<ImageGenError>(), Some(ImageGenError::Cancelled)));
        assert_eq!(sink.sent().last(), Some(&Sent::Text(42, TIMEOUT_TEXT.to_owned())));
    }

    #[tokio::test(start_paused = true)]
    async fn image_send_failure_is_reported() {
        let sink = Arc::new(RecordingSink {
            fail_images: true,
            ..RecordingSink::default()
        });
        let handler = handler(provider(0, Some(b"PNG")), Arc::new(NoEnhancement), sink.clone());

        let err = handler.handle(command("meme", "cats"), context(60)).await.unwrap_err();

        assert!(err.to_string().contains("failed to send image"));
        assert_eq!(sink.sent().last(), Some(&Sent::Text(42, SEND_FAILURE_TEXT.to_owned())));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_upload_stops_on_cancel() {
        let sink = Arc::new(RecordingSink {
            stall_images: true,
            ..RecordingSink::default()
        });
        let handler = handler(provider(0, Some(b"PNG")), Arc::new(NoEnhancement), sink.clone());

        let ctx = context(600);
        cancel_after(&ctx, 3);
        let began = Instant::now();

        let err = handler.handle(command("meme", "cats"), ctx).await.unwrap_err();

        assert!(began.elapsed() < Duration::from_secs(4));
        assert!(err.to_string().contains("cancelled while sending the image"));
        assert_eq!(sink.sent().last(), Some(&Sent::Text(42, TIMEOUT_TEXT.to_owned())));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_notice_stops_on_cancel() {
        let sink = Arc::new(RecordingSink {
            stall_texts: true,
            ..RecordingSink::default()
        });
        let provider = provider(0, Some(b"PNG"));
        let handler = handler(provider.clone(), Arc::new(NoEnhancement), sink.clone());

        let ctx = context(600);
        cancel_after(&ctx, 2);
        let began = Instant::now();

        let err = handler.handle(command("meme", "cats"), ctx).await.unwrap_err();

        assert!(began.elapsed() < Duration::from_secs(3));
        assert!(err.to_string().contains("progress notice"));
        assert!(provider.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn simple_commands_reply_with_text() {
        let sink = Arc::new(RecordingSink::default());
        let handler = handler(provider(0, None), Arc::new(NoEnhancement), sink.clone());

        for name in ["help", "start", "dance"] {
            handler.handle(command(name, ""), context(60)).await.unwrap();
        }

        let sent = sink.sent();
        assert_eq!(sent[0], Sent::Text(42, HELP_TEXT.to_owned()));
        assert!(matches!(&sent[1], Sent::Text(42, text) if text.starts_with("Hi, @ada!")));
        assert_eq!(sent[2], Sent::Text(42, UNKNOWN_TEXT.to_owned()));
    }
}
