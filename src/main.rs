//! rewrite-relay binary entrypoint.
//! Loads config and secrets, verifies sources, runs until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rewrite_relay::config::AppConfig;
use rewrite_relay::ingest::providers::build_providers;
use rewrite_relay::metrics::Metrics;
use rewrite_relay::publish::telegram::TelegramPublisher;
use rewrite_relay::telegram::BotApi;
use rewrite_relay::{init_tracing, Relay};

async fn run() -> anyhow::Result<()> {
    let mut cfg = AppConfig::load_default()?;
    cfg.resolve_secrets()?;
    tracing::info!(
        provider = %cfg.rewrite.provider,
        telegram_channels = cfg.ingest.telegram_channels.len(),
        twitter_accounts = cfg.ingest.twitter_accounts.len(),
        daily_cap = cfg.schedule.daily_cap,
        "config loaded"
    );

    let metrics = if cfg.api.enabled {
        Some(Metrics::init()?)
    } else {
        None
    };

    let providers = build_providers(&cfg)?;
    let api = BotApi::new(
        cfg.publish.bot_token.clone(),
        Duration::from_secs(cfg.publish.request_timeout_secs),
    )
    .context("building telegram client")?;
    let publisher = Arc::new(TelegramPublisher::new(api, cfg.publish.target_chat.clone()));

    let relay = Relay::start(&cfg, providers, publisher, metrics).await?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    relay.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    // .env is optional; real deployments pass env directly
    let _ = dotenvy::dotenv();
    init_tracing();

    if let Err(e) = run().await {
        tracing::error!(error = %format!("{e:#}"), "relay failed to start");
        std::process::exit(1);
    }
}
