use std::path::PathBuf;

use clap::Parser;

/// Muse meme bot
#[derive(Debug, Parser)]
#[command(name = "muse", about = "Telegram bot that races image generation providers")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "muse.toml", env = "MUSE_CONFIG")]
    pub config: PathBuf,

    /// Log filter, overrides the configured one (e.g. `muse=debug,info`)
    #[arg(long, env = "MUSE_LOG")]
    pub log_filter: Option<String>,
}
