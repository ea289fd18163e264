// src/ingest/mod.rs
pub mod poller;
pub mod providers;
pub mod types;

use crate::config::FilterConfig;
use crate::ingest::types::{SourceItem, SourceProvider};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use std::fmt;
use std::time::Instant;

/// Longest body we carry through the pipeline (Telegram message limit).
pub const MAX_TEXT_CHARS: usize = 4096;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("relay_ingested_total", "Items fetched from providers.");
        describe_counter!(
            "relay_provider_errors_total",
            "Provider fetch/parse errors."
        );
        describe_histogram!("relay_fetch_ms", "Provider fetch time in milliseconds.");
        describe_counter!("relay_poll_runs_total", "Completed poll cycles per provider.");
        describe_gauge!(
            "relay_ingest_last_run_ts",
            "Unix ts when a provider was last polled."
        );
    });
}

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[a-z][^>]*>").unwrap());
static RE_HSPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{00A0}]+").unwrap());
static RE_BLANKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Normalize raw provider text: decode entities, drop markup, unify quotes and
/// horizontal whitespace. Line structure is kept; posts are multi-paragraph.
pub fn normalize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    let mut out = RE_TAGS.replace_all(&decoded, "").into_owned();

    out = out.replace("\r\n", "\n").replace('\r', "\n");

    // “ ” « » → ", ‘ ’ → '
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    out = RE_HSPACE.replace_all(&out, " ").into_owned();
    out = out.lines().map(str::trim).collect::<Vec<_>>().join("\n");
    out = RE_BLANKS.replace_all(&out, "\n\n").trim().to_string();

    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }
    out
}

/// Why an item never reached the rewriter. Silent drops; counted, not retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooShort,
    Forwarded,
    Reply,
    LowEngagement,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TooShort => "too_short",
            Self::Forwarded => "forwarded",
            Self::Reply => "reply",
            Self::LowEngagement => "low_engagement",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Eligibility filter applied after dedup and before any rewrite.
pub fn check_eligibility(item: &SourceItem, cfg: &FilterConfig) -> Result<(), SkipReason> {
    if cfg.skip_forwarded && item.forwarded {
        return Err(SkipReason::Forwarded);
    }
    if cfg.skip_replies && item.reply {
        return Err(SkipReason::Reply);
    }
    if item.text.trim().chars().count() < cfg.min_length {
        return Err(SkipReason::TooShort);
    }
    if cfg.min_engagement > 0 && item.engagement.total() < cfg.min_engagement {
        return Err(SkipReason::LowEngagement);
    }
    Ok(())
}

/// Poll one provider and normalize what it returns. Provider errors are logged
/// and counted; the caller sees an empty batch.
pub async fn fetch_normalized(provider: &dyn SourceProvider) -> Vec<SourceItem> {
    ensure_metrics_described();

    let started = Instant::now();
    let fetched = provider.fetch_latest().await;
    histogram!("relay_fetch_ms", "provider" => provider.name())
        .record(started.elapsed().as_secs_f64() * 1000.0);
    gauge!("relay_ingest_last_run_ts").set(chrono::Utc::now().timestamp() as f64);

    match fetched {
        Ok(items) => {
            counter!("relay_ingested_total", "provider" => provider.name())
                .increment(items.len() as u64);
            items
                .into_iter()
                .map(|mut it| {
                    it.text = normalize_text(&it.text);
                    it
                })
                .filter(|it| !it.text.is_empty() || it.media.is_some())
                .collect()
        }
        Err(e) => {
            tracing::warn!(target: "ingest", error = ?e, provider = provider.name(), "provider error");
            counter!("relay_provider_errors_total", "provider" => provider.name()).increment(1);
            Vec::new()
        }
    }
}
