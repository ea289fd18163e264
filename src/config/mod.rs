// src/config/mod.rs
//! Relay configuration: one TOML document with a section per subsystem.
//!
//! Lookup order mirrors the rest of the crate's config loaders:
//! 1) `$RELAY_CONFIG_PATH` (must exist)
//! 2) `config/relay.toml`
//! 3) built-in defaults

pub mod ai;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use ai::{AiConfig, ProviderKind};

pub const ENV_CONFIG_PATH: &str = "RELAY_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/relay.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ingest: IngestConfig,
    pub filter: FilterConfig,
    pub rewrite: AiConfig,
    pub schedule: ScheduleConfig,
    pub publish: PublishConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
}

/// `[ingest]`: which sources to watch and how often.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// "@username" or numeric chat ids ("-100..."); read through the publish bot.
    pub telegram_channels: Vec<String>,
    pub twitter_accounts: Vec<String>,
    /// "ENV" means: read TWITTER_BEARER_TOKEN
    pub twitter_bearer_token: String,
    /// JSON array of items; used for dry runs and tests.
    pub fixture_path: Option<PathBuf>,
    pub poll_interval_secs: u64,
    pub twitter_poll_interval_secs: u64,
    /// Bound of the provider → coordinator channel.
    pub channel_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            telegram_channels: Vec::new(),
            twitter_accounts: Vec::new(),
            twitter_bearer_token: "ENV".to_string(),
            fixture_path: None,
            poll_interval_secs: 30,
            twitter_poll_interval_secs: 300,
            channel_capacity: 64,
        }
    }
}

/// `[filter]`: eligibility rules applied before any rewrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Minimum trimmed length, in characters.
    pub min_length: usize,
    pub skip_forwarded: bool,
    pub skip_replies: bool,
    /// views + likes + forwards; 0 disables the check.
    pub min_engagement: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_length: 50,
            skip_forwarded: true,
            skip_replies: true,
            min_engagement: 0,
        }
    }
}

/// `[schedule]`: pacing of the publish queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub daily_cap: u32,
    pub min_interval_minutes: u32,
    pub max_interval_minutes: u32,
    /// Delay of the very first post when nothing was ever published.
    pub first_delay_secs: u64,
    /// Upper bound on how long the drain loop sleeps while entries are queued.
    pub tick_secs: u64,
    /// Rate-limited entries are retried at most this many times.
    pub max_publish_attempts: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_cap: 24,
            min_interval_minutes: 20,
            max_interval_minutes: 30,
            first_delay_secs: 60,
            tick_secs: 60,
            max_publish_attempts: 5,
        }
    }
}

/// `[publish]`: the single target channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// "ENV" means: read TELEGRAM_BOT_TOKEN
    pub bot_token: String,
    pub target_chat: String,
    pub signature: String,
    pub source_label: String,
    pub request_timeout_secs: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            bot_token: "ENV".to_string(),
            target_chat: String::new(),
            signature: "@ton_boom".to_string(),
            source_label: "Source".to_string(),
            request_timeout_secs: 20,
        }
    }
}

/// `[storage]`: where seen/stats/queue documents live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub seen_retention_days: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            seen_retention_days: 30,
        }
    }
}

impl StorageConfig {
    pub fn seen_path(&self) -> PathBuf {
        self.data_dir.join("seen.json")
    }
    pub fn stats_path(&self) -> PathBuf {
        self.data_dir.join("stats.json")
    }
    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join("queue.json")
    }
}

/// `[api]`: status + metrics endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

impl AppConfig {
    /// Load and normalize config from an explicit TOML path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let cfg: AppConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg.normalized())
    }

    /// Env var first, then `config/relay.toml`, then defaults.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            return Self::load_from(&default_p);
        }
        Ok(Self::default().normalized())
    }

    /// Repair values that would break scheduling rather than rejecting the file.
    pub fn normalized(mut self) -> Self {
        let s = &mut self.schedule;
        if s.min_interval_minutes > s.max_interval_minutes {
            // swap to keep a valid interval
            std::mem::swap(&mut s.min_interval_minutes, &mut s.max_interval_minutes);
        }
        if s.tick_secs == 0 {
            s.tick_secs = ScheduleConfig::default().tick_secs;
        }
        if s.max_publish_attempts == 0 {
            s.max_publish_attempts = 1;
        }
        if self.ingest.channel_capacity == 0 {
            self.ingest.channel_capacity = 1;
        }
        if self.ingest.poll_interval_secs == 0 {
            self.ingest.poll_interval_secs = IngestConfig::default().poll_interval_secs;
        }
        if self.ingest.twitter_poll_interval_secs == 0 {
            self.ingest.twitter_poll_interval_secs =
                IngestConfig::default().twitter_poll_interval_secs;
        }
        self.ingest.telegram_channels = clean_list(std::mem::take(&mut self.ingest.telegram_channels));
        self.ingest.twitter_accounts = clean_list(
            std::mem::take(&mut self.ingest.twitter_accounts)
                .into_iter()
                .map(|a| a.trim().trim_start_matches('@').to_string())
                .collect(),
        );
        self.publish.signature = self.publish.signature.trim().to_string();
        if self.storage.seen_retention_days <= 0 {
            self.storage.seen_retention_days = StorageConfig::default().seen_retention_days;
        }
        self
    }

    /// Resolve every `"ENV"` secret. Only secrets for enabled features are required.
    pub fn resolve_secrets(&mut self) -> Result<()> {
        self.rewrite.resolve()?;

        if self.publish.bot_token.trim().eq_ignore_ascii_case("env") {
            self.publish.bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
                .map_err(|_| anyhow!("Missing TELEGRAM_BOT_TOKEN env var"))?;
        }
        if !self.ingest.twitter_accounts.is_empty()
            && self.ingest.twitter_bearer_token.trim().eq_ignore_ascii_case("env")
        {
            self.ingest.twitter_bearer_token = std::env::var("TWITTER_BEARER_TOKEN")
                .map_err(|_| anyhow!("Missing TWITTER_BEARER_TOKEN env var"))?;
        }
        if self.publish.target_chat.trim().is_empty() {
            return Err(anyhow!("[publish].target_chat is required"));
        }
        Ok(())
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    use std::collections::BTreeSet;
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for it in items {
        let t = it.trim();
        if !t.is_empty() && seen.insert(t.to_ascii_lowercase()) {
            out.push(t.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
[schedule]
daily_cap = 5
min_interval_minutes = 40
max_interval_minutes = 10

[ingest]
telegram_channels = [" @tonlive ", "", "@TONLIVE", "@durov"]
twitter_accounts = ["@elonmusk"]
"#,
        )
        .unwrap();
        let cfg = cfg.normalized();
        assert_eq!(cfg.schedule.daily_cap, 5);
        assert_eq!(cfg.schedule.min_interval_minutes, 10);
        assert_eq!(cfg.schedule.max_interval_minutes, 40);
        assert_eq!(cfg.schedule.first_delay_secs, 60);
        assert_eq!(cfg.ingest.telegram_channels, vec!["@tonlive", "@durov"]);
        assert_eq!(cfg.ingest.twitter_accounts, vec!["elonmusk"]);
        assert_eq!(cfg.filter.min_length, 50);
        assert_eq!(cfg.rewrite.provider, "local");
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_CONFIG_PATH);

        // Nothing on disk → defaults
        let cfg = AppConfig::load_default().unwrap();
        assert_eq!(cfg.schedule.daily_cap, 24);

        // Env wins
        let p = tmp.path().join("custom.toml");
        fs::write(&p, "[schedule]\ndaily_cap = 3\n").unwrap();
        env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        let cfg = AppConfig::load_default().unwrap();
        assert_eq!(cfg.schedule.daily_cap, 3);

        // Env pointing nowhere is an error
        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(AppConfig::load_default().is_err());
        env::remove_var(ENV_CONFIG_PATH);

        env::set_current_dir(&old).unwrap();
    }

    #[serial_test::serial]
    #[test]
    fn env_secrets_resolve_or_fail_loudly() {
        let mut cfg = AppConfig::default().normalized();
        cfg.publish.target_chat = "@target".into();
        env::set_var("TELEGRAM_BOT_TOKEN", "123:abc");
        cfg.resolve_secrets().unwrap();
        assert_eq!(cfg.publish.bot_token, "123:abc");
        env::remove_var("TELEGRAM_BOT_TOKEN");

        let mut cfg = AppConfig::default().normalized();
        cfg.publish.target_chat = "@target".into();
        cfg.rewrite.provider = "openai".into();
        env::remove_var("OPENAI_API_KEY");
        let err = cfg.resolve_secrets().unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}
