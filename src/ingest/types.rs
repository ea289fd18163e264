// src/ingest/types.rs
use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dedup identity of an item. `raw_id` is only unique inside `provider`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub provider: String, // e.g. "telegram", "twitter"
    pub raw_id: String,   // e.g. "-1001234/567" or a tweet id
}

impl ItemKey {
    pub fn new(provider: impl Into<String>, raw_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            raw_id: raw_id.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.raw_id)
    }
}

/// How the final post credits its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    /// Signature only.
    #[default]
    Generic,
    /// Signature plus a "<label>: <reference>" line (external micro-blogs).
    /// `reference` is the original URL, or the platform name when no URL exists.
    Attributed { reference: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Origin {
    pub title: String,
    pub handle: Option<String>,
    pub permalink: Option<String>,
}

/// Informational only; never used for dedup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Engagement {
    pub views: u64,
    pub likes: u64,
    pub forwards: u64,
}

impl Engagement {
    pub fn total(&self) -> u64 {
        self.views
            .saturating_add(self.likes)
            .saturating_add(self.forwards)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Animation,
    Document,
}

/// Media attached to a post. `handle` is opaque to the pipeline (a Bot API file_id
/// or a direct URL) and is handed back to the publisher unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub kind: MediaKind,
    pub handle: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceItem {
    pub key: ItemKey,
    pub text: String,
    pub origin: Origin,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub engagement: Engagement,
    #[serde(default)]
    pub media: Option<MediaDescriptor>,
    #[serde(default)]
    pub kind: SourceKind,
    /// Forwarded / reposted from somewhere else.
    #[serde(default)]
    pub forwarded: bool,
    /// Reply inside a thread.
    #[serde(default)]
    pub reply: bool,
}

#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    /// Items newer than the provider's internal marker; advances the marker.
    async fn fetch_latest(&self) -> Result<Vec<SourceItem>>;
    fn name(&self) -> &'static str;

    /// Called once at startup; an error means the source cannot be used at all.
    async fn verify(&self) -> Result<()> {
        Ok(())
    }
}
