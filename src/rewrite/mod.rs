// src/rewrite/mod.rs
//! Rewrite backend selection. One backend is chosen at startup; any failure on
//! a single item falls back to the offline template for that item only.

pub mod backends;
pub mod prompt;
pub mod template;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::config::{AiConfig, ProviderKind};
use crate::error::{Classify, ErrorClass};
use crate::ingest::types::{MediaDescriptor, SourceItem};
use template::TemplateBackend;

pub const FALLBACK_BACKEND: &str = "fallback";
pub const FALLBACK_MODEL: &str = "template";

#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("{backend} request failed: {reason}")]
    Request { backend: &'static str, reason: String },

    #[error("{backend} returned HTTP {status}: {body}")]
    Status {
        backend: &'static str,
        status: u16,
        body: String,
    },

    #[error("{backend} rate limited, retry after {retry_after:?}")]
    RateLimited {
        backend: &'static str,
        retry_after: Option<Duration>,
    },

    #[error("{backend} rejected the credentials")]
    Auth { backend: &'static str },

    #[error("{backend} returned empty output")]
    Empty { backend: &'static str },

    #[error("rewrite timed out after {0:?}")]
    Timeout(Duration),
}

impl Classify for RewriteError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Auth { .. } => ErrorClass::PermanentAuth,
            _ => ErrorClass::TransientProvider,
        }
    }
}

/// A source item plus its final text. Built once, never mutated afterwards
/// except by the sanitizer producing a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewrittenItem {
    pub source: SourceItem,
    pub text: String,
    pub backend: String,
    pub model: String,
    pub processing_ms: u64,
    pub media: Option<MediaDescriptor>,
}

#[async_trait]
pub trait RewriteBackend: Send + Sync {
    /// Raw backend output for `item`; empty output must be reported as an error.
    async fn rewrite_text(&self, item: &SourceItem) -> Result<String, RewriteError>;
    fn name(&self) -> &'static str;
    fn model(&self) -> &str;
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_histogram!("relay_rewrite_ms", "Rewrite latency in milliseconds.");
        describe_counter!(
            "relay_rewrite_fallback_total",
            "Items that fell back to the offline template."
        );
    });
}

/// Selected backend + per-call budget.
pub struct Rewriter {
    backend: Arc<dyn RewriteBackend>,
    timeout: Duration,
}

impl Rewriter {
    pub fn new(backend: Arc<dyn RewriteBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn from_config(cfg: &AiConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            build_backend(cfg)?,
            Duration::from_secs(cfg.timeout_secs),
        ))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Never fails: errors, timeouts and empty output resolve to the template.
    pub async fn rewrite(&self, item: SourceItem) -> RewrittenItem {
        ensure_metrics_described();
        let started = Instant::now();

        let attempt = match tokio::time::timeout(self.timeout, self.backend.rewrite_text(&item)).await {
            Ok(r) => r,
            Err(_) => Err(RewriteError::Timeout(self.timeout)),
        };

        let (text, backend, model) = match attempt {
            Ok(t) if !t.trim().is_empty() => {
                (t, self.backend.name().to_string(), self.backend.model().to_string())
            }
            other => {
                let err = match other {
                    Err(e) => e,
                    Ok(_) => RewriteError::Empty {
                        backend: self.backend.name(),
                    },
                };
                tracing::warn!(
                    target: "rewrite",
                    key = %item.key,
                    stage = "rewrite",
                    backend = self.backend.name(),
                    class = %err.class(),
                    error = %err,
                    "backend failed; using template"
                );
                counter!("relay_rewrite_fallback_total", "backend" => self.backend.name()).increment(1);
                (
                    template::render(&item),
                    FALLBACK_BACKEND.to_string(),
                    FALLBACK_MODEL.to_string(),
                )
            }
        };

        let processing_ms = started.elapsed().as_millis() as u64;
        histogram!("relay_rewrite_ms", "backend" => backend.clone()).record(processing_ms as f64);
        tracing::debug!(target: "rewrite", key = %item.key, backend = %backend, ms = processing_ms, "rewritten");

        let media = item.media.clone();
        RewrittenItem {
            source: item,
            text,
            backend,
            model,
            processing_ms,
            media,
        }
    }
}

/// Build the configured backend. Secrets must already be resolved.
pub fn build_backend(cfg: &AiConfig) -> anyhow::Result<Arc<dyn RewriteBackend>> {
    let kind = cfg.provider_kind()?;
    let timeout = Duration::from_secs(cfg.timeout_secs);
    let model = cfg.model_or_default();
    let base = cfg.base_url_or_default();

    let backend: Arc<dyn RewriteBackend> = match kind {
        ProviderKind::Local => Arc::new(TemplateBackend),
        ProviderKind::Anthropic => Arc::new(
            backends::Anthropic::new(base, cfg.api_key.clone(), model, timeout)
                .context("building anthropic client")?,
        ),
        ProviderKind::OpenAi | ProviderKind::DeepSeek | ProviderKind::Groq | ProviderKind::Ollama => {
            Arc::new(
                backends::OpenAiCompatible::new(kind.as_str(), base, cfg.api_key.clone(), model, timeout)
                    .with_context(|| format!("building {} client", kind.as_str()))?,
            )
        }
    };
    tracing::info!(
        target: "rewrite",
        backend = backend.name(),
        model = backend.model(),
        key_len = cfg.api_key.len(),
        "rewrite backend selected"
    );
    Ok(backend)
}
