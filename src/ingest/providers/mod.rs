// src/ingest/providers/mod.rs
pub mod fixture;
pub mod telegram;
pub mod twitter;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::{AppConfig, IngestConfig};
use crate::ingest::types::SourceProvider;
use crate::telegram::BotApi;

/// A provider plus how often it should be polled.
pub struct ProviderSlot {
    pub provider: Arc<dyn SourceProvider>,
    pub every: Duration,
}

/// Build every provider the config asks for. Secrets must already be resolved.
pub fn build_providers(cfg: &AppConfig) -> Result<Vec<ProviderSlot>> {
    let ing: &IngestConfig = &cfg.ingest;
    let mut out = Vec::new();

    if !ing.telegram_channels.is_empty() {
        let api = BotApi::new(
            cfg.publish.bot_token.clone(),
            // long-poll window + slack
            Duration::from_secs(telegram::LONG_POLL_SECS + 10),
        )?;
        out.push(ProviderSlot {
            provider: Arc::new(telegram::TelegramChannelProvider::new(
                api,
                ing.telegram_channels.clone(),
            )),
            every: Duration::from_secs(ing.poll_interval_secs),
        });
    }

    if !ing.twitter_accounts.is_empty() {
        out.push(ProviderSlot {
            provider: Arc::new(twitter::TwitterProvider::new(
                ing.twitter_bearer_token.clone(),
                ing.twitter_accounts.clone(),
            )?),
            every: Duration::from_secs(ing.twitter_poll_interval_secs),
        });
    }

    if let Some(path) = &ing.fixture_path {
        out.push(ProviderSlot {
            provider: Arc::new(fixture::FixtureProvider::from_path(path)?),
            every: Duration::from_secs(ing.poll_interval_secs),
        });
    }

    Ok(out)
}
