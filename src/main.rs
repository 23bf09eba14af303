mod config;
mod error;
mod poller;
mod tesla;
mod warehouse;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::poller::Poller;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,powerwall_poller=info".into());
    // Diagnostics go to stderr; stdout carries only the poller status lines.
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    init_tracing()?;

    let cancel = CancellationToken::new();
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        tracing::info!("shutdown signal received");
        signal_cancel.cancel();
    });

    println!("[poller] starting…");
    tracing::info!(
        interval_seconds = config.interval_seconds,
        cache = %config.token_cache_path.display(),
        "poller configured"
    );

    Poller::new(config).run(cancel).await;

    println!("[poller] stopped.");
    Ok(())
}
