use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt as _;
use muse_config::DispatchConfig;
use muse_telemetry::metrics;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::admission::{AdmissionPool, AdmissionSlot};
use crate::command::{Command, CommandContext, CommandHandler, InboundSource, ReplyTarget};
use crate::shutdown::DispatcherHandle;

/// Capacity of the default failure channel
const FAILURE_BUFFER: usize = 64;

/// Matches the `dispatch.reply_grace` default
const DEFAULT_REPLY_GRACE: Duration = Duration::from_secs(15);

/// A command that did not finish cleanly
#[derive(Debug, thiserror::Error)]
pub enum TaskFailure {
    /// The handler returned an error
    #[error("command /{command} failed: {error:#}")]
    Failed {
        command: String,
        target: ReplyTarget,
        error: anyhow::Error,
    },

    /// The handler panicked
    #[error("command /{command} panicked: {message}")]
    Panicked {
        command: String,
        target: ReplyTarget,
        message: String,
    },

    /// The handler outlived its deadline plus the reply grace period
    #[error("command /{command} abandoned after {after:?}")]
    TimedOut {
        command: String,
        target: ReplyTarget,
        after: Duration,
    },
}

impl TaskFailure {
    /// Short label used for metrics
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "failed",
            Self::Panicked { .. } => "panic",
            Self::TimedOut { .. } => "timeout",
        }
    }

    pub fn command(&self) -> &str {
        match self {
            Self::Failed { command, .. } | Self::Panicked { command, .. } | Self::TimedOut { command, .. } => command,
        }
    }

    pub const fn target(&self) -> &ReplyTarget {
        match self {
            Self::Failed { target, .. } | Self::Panicked { target, .. } | Self::TimedOut { target, .. } => target,
        }
    }
}

/// Turns an inbound command stream into at most `workers` concurrent tasks
///
/// Each admitted command runs on its own task with a deadline of
/// `command_timeout`. When the deadline passes the command's cancellation
/// token fires; if the handler is still running `reply_grace` later it is
/// dropped and reported as [`TaskFailure::TimedOut`].
pub struct Dispatcher {
    handler: Arc<dyn CommandHandler>,
    workers: usize,
    command_timeout: Duration,
    reply_grace: Duration,
    failures: Option<mpsc::Sender<TaskFailure>>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn CommandHandler>, workers: usize, command_timeout: Duration) -> Self {
        Self {
            handler,
            workers,
            command_timeout,
            reply_grace: DEFAULT_REPLY_GRACE,
            failures: None,
        }
    }

    /// Create a dispatcher from the `[dispatch]` configuration section
    pub fn from_config(handler: Arc<dyn CommandHandler>, config: &DispatchConfig) -> Self {
        Self::new(handler, config.workers, config.command_timeout).with_reply_grace(config.reply_grace)
    }

    /// Time a cancelled handler gets to send its final reply
    ///
    /// With a zero grace the handler is dropped as soon as the deadline
    /// passes, so it never gets to tell the user it timed out.
    #[must_use]
    pub const fn with_reply_grace(mut self, reply_grace: Duration) -> Self {
        self.reply_grace = reply_grace;
        self
    }

    /// Send task failures to `sink` instead of the built-in logger
    #[must_use]
    pub fn with_failure_sink(mut self, sink: mpsc::Sender<TaskFailure>) -> Self {
        self.failures = Some(sink);
        self
    }

    /// Start admitting commands from `source`
    ///
    /// Every task's cancellation token is a child of `root`, so cancelling
    /// `root` reaches all in-flight commands.
    pub fn start<S>(self, source: S, root: CancellationToken) -> DispatcherHandle
    where
        S: InboundSource + 'static,
    {
        let failures = self.failures.unwrap_or_else(|| {
            let (tx, rx) = mpsc::channel(FAILURE_BUFFER);
            tokio::spawn(log_failures(rx));
            tx
        });

        let pool = AdmissionPool::new(self.workers);
        let tracker = TaskTracker::new();
        let admission = root.child_token();

        let runner = TaskRunner {
            handler: self.handler,
            command_timeout: self.command_timeout,
            reply_grace: self.reply_grace,
            failures,
            root: root.clone(),
        };

        tracing::info!(
            workers = pool.capacity(),
            command_timeout = ?self.command_timeout,
            "dispatcher started"
        );

        let finished = CancellationToken::new();
        tokio::spawn({
            let admitting = admit(source, pool.clone(), tracker.clone(), admission.clone(), runner);
            let finished = finished.clone();
            async move {
                admitting.await;
                finished.cancel();
            }
        });

        DispatcherHandle::new(root, admission, finished, pool, tracker)
    }
}

/// Everything a spawned command task needs
#[derive(Clone)]
struct TaskRunner {
    handler: Arc<dyn CommandHandler>,
    command_timeout: Duration,
    reply_grace: Duration,
    failures: mpsc::Sender<TaskFailure>,
    root: CancellationToken,
}

async fn admit<S: InboundSource>(
    mut source: S,
    pool: AdmissionPool,
    tracker: TaskTracker,
    stop: CancellationToken,
    runner: TaskRunner,
) {
    loop {
        let command = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            command = source.recv() => command,
        };

        let Some(command) = command else {
            tracing::info!("inbound source closed");
            break;
        };

        metrics::record_command(&command.name);

        // Backpressure: nothing more is received until a slot frees up
        let slot = tokio::select! {
            biased;
            () = stop.cancelled() => {
                tracing::warn!(command = %command.name, chat_id = command.target.chat_id, "command dropped, shutting down");
                break;
            }
            slot = pool.acquire() => match slot {
                Ok(slot) => slot,
                Err(_) => break,
            },
        };

        tracker.spawn(runner.clone().run(command, slot));
    }

    source.stop();
    tracing::debug!("admission loop stopped");
}

impl TaskRunner {
    async fn run(self, command: Command, slot: AdmissionSlot) {
        let _slot = slot;
        metrics::add_in_flight(1);

        let started = Instant::now();
        let deadline = started + self.command_timeout;
        let ceiling = deadline + self.reply_grace;

        let cancel = self.root.child_token();
        let _cancel_on_exit = cancel.clone().drop_guard();

        let name = command.name.clone();
        let target = command.target.clone();

        tracing::debug!(command = %name, chat_id = target.chat_id, "command admitted");

        let ctx = CommandContext {
            cancel: cancel.clone(),
            deadline,
        };

        let handling = AssertUnwindSafe(self.handler.handle(command, ctx)).catch_unwind();
        tokio::pin!(handling);

        let outcome = tokio::select! {
            outcome = &mut handling => Some(outcome),
            () = tokio::time::sleep_until(deadline) => None,
        };

        let outcome = match outcome {
            Some(outcome) => Some(outcome),
            None => {
                tracing::warn!(command = %name, chat_id = target.chat_id, "command deadline reached, cancelling");
                cancel.cancel();

                tokio::select! {
                    biased;
                    outcome = &mut handling => Some(outcome),
                    () = tokio::time::sleep_until(ceiling) => None,
                }
            }
        };

        let failure = match outcome {
            Some(Ok(Ok(()))) => None,
            Some(Ok(Err(error))) => Some(TaskFailure::Failed {
                command: name.clone(),
                target,
                error,
            }),
            Some(Err(panic)) => Some(TaskFailure::Panicked {
                command: name.clone(),
                target,
                message: panic_message(panic.as_ref()),
            }),
            None => Some(TaskFailure::TimedOut {
                command: name.clone(),
                target,
                after: started.elapsed(),
            }),
        };

        metrics::add_in_flight(-1);

        match failure {
            None => tracing::debug!(command = %name, elapsed = ?started.elapsed(), "command finished"),
            Some(failure) => self.report(failure),
        }
    }

    fn report(&self, failure: TaskFailure) {
        metrics::record_command_error(failure.kind());

        if let Err(e) = self.failures.try_send(failure) {
            let failure = match e {
                mpsc::error::TrySendError::Full(f) | mpsc::error::TrySendError::Closed(f) => f,
            };
            tracing::error!(error = %failure, "failure sink unavailable");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

async fn log_failures(mut rx: mpsc::Receiver<TaskFailure>) {
    while let Some(failure) = rx.recv().await {
        tracing::error!(
            command = %failure.command(),
            chat_id = failure.target().chat_id,
            kind = failure.kind(),
            error = %failure,
            "command failed"
        );
    }
}
