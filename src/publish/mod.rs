// src/publish/mod.rs
pub mod telegram;

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Classify, ErrorClass};
use crate::ingest::types::MediaDescriptor;

/// What the scheduler needs to know after a publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    RateLimited(Duration),
    /// The target rejects us (no rights, bad token). Not retried.
    Forbidden(String),
    Unknown(String),
}

impl PublishOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::RateLimited(_) => "rate_limited",
            Self::Forbidden(_) => "forbidden",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Default wait when a transport failure gives no hint.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("markup rejected: {0}")]
    BadMarkup(String),

    #[error("api error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl Classify for PublishError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimited(_) | Self::Transport(_) => ErrorClass::TransientProvider,
            Self::Forbidden(_) => ErrorClass::PermanentAuth,
            Self::BadMarkup(_) | Self::Api { .. } => ErrorClass::ValidationSkip,
        }
    }
}

impl From<PublishError> for PublishOutcome {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::RateLimited(d) => Self::RateLimited(d),
            PublishError::Transport(_) => Self::RateLimited(DEFAULT_RETRY_AFTER),
            PublishError::Forbidden(r) => Self::Forbidden(r),
            other => Self::Unknown(other.to_string()),
        }
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, text: &str, media: Option<&MediaDescriptor>) -> PublishOutcome;
    fn name(&self) -> &'static str;
}

/// Records what it was asked to send and replays scripted outcomes
/// (then `Published` once the script runs out).
#[derive(Default)]
pub struct MockPublisher {
    script: Mutex<VecDeque<PublishOutcome>>,
    sent: Mutex<Vec<(String, Option<MediaDescriptor>)>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(outcomes: impl IntoIterator<Item = PublishOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Texts of every attempt, successful or not.
    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, text: &str, media: Option<&MediaDescriptor>) -> PublishOutcome {
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((text.to_string(), media.cloned()));
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or(PublishOutcome::Published)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
