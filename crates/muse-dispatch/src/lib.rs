#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

mod admission;
mod command;
mod dispatcher;
mod error;
mod shutdown;

pub use admission::{AdmissionPool, AdmissionSlot};
pub use command::{Command, CommandContext, CommandHandler, InboundSource, ReplyTarget};
pub use dispatcher::{Dispatcher, TaskFailure};
pub use error::{DispatchError, Result};
pub use shutdown::{DispatcherHandle, Phase, ShutdownReport};
