#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;
mod health;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use args::Args;
use clap::Parser;
use health::Readiness;
use muse_auth::{CredentialCache, IamTokenIssuer};
use muse_bot::{BotHandler, NoEnhancement, PromptEnhancer, TelegramClient, TelegramSource, YandexGptEnhancer};
use muse_config::Config;
use muse_dispatch::Dispatcher;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args.config)?;

    // Initialize telemetry
    let log_filter = config.log_filter(args.log_filter.as_deref());
    let _telemetry_guard = muse_telemetry::init(config.telemetry.as_ref(), &log_filter)?;

    tracing::info!(
        config_path = %args.config.display(),
        workers = config.dispatch.workers,
        "starting muse"
    );

    let root = CancellationToken::new();

    let credentials = match &config.auth {
        Some(auth) => {
            let issuer = IamTokenIssuer::from_config(auth).context("Failed to create IAM token issuer")?;
            Some(CredentialCache::spawn(
                Arc::new(issuer),
                auth.token_ttl,
                auth.refresh_interval,
                root.child_token(),
            ))
        }
        None => None,
    };

    let race = muse_imagegen::build_race(&config.imagegen, credentials.clone())?;

    let enhancer: Arc<dyn PromptEnhancer> = match (&config.prompt, &credentials) {
        (Some(prompt), Some(credentials)) => Arc::new(
            YandexGptEnhancer::new(prompt, credentials.clone()).context("Failed to create prompt enhancer")?,
        ),
        _ => Arc::new(NoEnhancement),
    };

    let telegram = TelegramClient::from_config(&config.bot).context("Failed to create Telegram client")?;

    // Health endpoints outlive the dispatcher so readiness reports the drain
    let readiness = Readiness::default();
    let health_shutdown = CancellationToken::new();
    if config.health.enabled {
        health::spawn(&config.health, readiness.clone(), health_shutdown.clone()).await?;
    }

    let handler = BotHandler::new(Arc::new(race), enhancer, Arc::new(telegram.clone()));
    let bot_username = match &config.bot.username {
        Some(username) => Some(username.trim_start_matches('@').to_owned()),
        None => telegram.get_me().await.context("Failed to look up the bot account")?.username,
    };

    let mut source = TelegramSource::new(telegram, Duration::from_secs(config.bot.poll_timeout));
    if let Some(username) = bot_username {
        tracing::info!(%username, "accepting commands addressed to this bot");
        source = source.with_bot_username(username);
    }

    let dispatcher = Dispatcher::from_config(Arc::new(handler), &config.dispatch).start(source, root.clone());
    readiness.set(dispatcher.clone());

    tokio::select! {
        () = shutdown_signal() => {}
        () = dispatcher.closed() => tracing::warn!("inbound source closed unexpectedly"),
    }

    let report = dispatcher.shutdown(config.dispatch.shutdown_grace).await;
    health_shutdown.cancel();

    if !report.drained {
        tracing::error!(
            outstanding = report.outstanding,
            elapsed = ?report.elapsed,
            "shutdown timed out"
        );
        anyhow::bail!("shutdown timed out with {} commands still running", report.outstanding);
    }

    tracing::info!(elapsed = ?report.elapsed, "muse stopped");
    Ok(())
}

/// Wait for a shutdown signal (`SIGINT` or `SIGTERM`)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
