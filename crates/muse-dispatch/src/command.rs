use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Where replies to a command go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTarget {
    pub chat_id: i64,
    /// Message that carried the command
    pub message_id: Option<i64>,
    /// Display name of the sender, if known
    pub user: Option<String>,
}

impl ReplyTarget {
    pub const fn chat(chat_id: i64) -> Self {
        Self {
            chat_id,
            message_id: None,
            user: None,
        }
    }
}

/// An inbound bot command, e.g. `/meme a cat in space`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command name without the leading slash
    pub name: String,
    /// Free text after the command name, trimmed
    pub argument: String,
    pub target: ReplyTarget,
}

impl Command {
    pub fn new(name: impl Into<String>, argument: impl Into<String>, target: ReplyTarget) -> Self {
        Self {
            name: name.into(),
            argument: argument.into(),
            target,
        }
    }
}

/// Per-command execution context
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Fires at the command deadline or when the dispatcher shuts down
    pub cancel: CancellationToken,
    /// Processing deadline for this command
    pub deadline: Instant,
}

/// Stream of inbound commands
#[async_trait]
pub trait InboundSource: Send {
    /// Next command, or `None` once the source is exhausted
    async fn recv(&mut self) -> Option<Command>;

    /// Stop producing commands; calling it again has no effect
    fn stop(&mut self);
}

#[async_trait]
impl InboundSource for mpsc::Receiver<Command> {
    async fn recv(&mut self) -> Option<Command> {
        mpsc::Receiver::recv(self).await
    }

    fn stop(&mut self) {
        self.close();
    }
}

/// Business logic run for each admitted command
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle one command
    ///
    /// Long-running work must observe `ctx.cancel`. The dispatcher drops the
    /// returned future if it is still running well past `ctx.deadline`.
    async fn handle(&self, command: Command, ctx: CommandContext) -> anyhow::Result<()>;
}
