// src/ingest/providers/telegram.rs
//! Channel posts delivered to the relay bot through `getUpdates`.
//! The bot must be a member (admin) of every watched channel.

use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;

use crate::ingest::types::{
    Engagement, ItemKey, MediaDescriptor, MediaKind, Origin, SourceItem, SourceKind,
    SourceProvider,
};
use crate::telegram::BotApi;

pub const LONG_POLL_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub channel_post: Option<ChannelPost>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelPost {
    pub message_id: i64,
    pub chat: Chat,
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Vec<FileRef>,
    #[serde(default)]
    pub video: Option<FileRef>,
    #[serde(default)]
    pub animation: Option<FileRef>,
    #[serde(default)]
    pub document: Option<FileRef>,
    #[serde(default)]
    pub forward_origin: Option<serde_json::Value>,
    #[serde(default)]
    pub forward_from_chat: Option<serde_json::Value>,
    #[serde(default)]
    pub reply_to_message: Option<serde_json::Value>,
    /// Service posts (pins, title changes) carry one of these instead of content.
    #[serde(default)]
    pub pinned_message: Option<serde_json::Value>,
    #[serde(default)]
    pub new_chat_title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FileRef {
    pub file_id: String,
    #[serde(default)]
    pub file_size: Option<u64>,
}

pub struct TelegramChannelProvider {
    api: BotApi,
    channels: Vec<String>,
    offset: AtomicI64,
}

impl TelegramChannelProvider {
    pub fn new(api: BotApi, channels: Vec<String>) -> Self {
        Self {
            api,
            channels,
            offset: AtomicI64::new(0),
        }
    }
}

/// `@name`, `name` and numeric ids all match.
fn is_watched(chat: &Chat, channels: &[String]) -> bool {
    let id = chat.id.to_string();
    channels.iter().any(|c| {
        let c = c.trim_start_matches('@');
        c == id
            || chat
                .username
                .as_deref()
                .is_some_and(|u| u.eq_ignore_ascii_case(c))
    })
}

fn pick_media(post: &ChannelPost) -> Option<MediaDescriptor> {
    // largest photo size comes last
    if let Some(p) = post.photo.last() {
        return Some(MediaDescriptor {
            kind: MediaKind::Photo,
            handle: p.file_id.clone(),
            url: None,
        });
    }
    let (kind, f) = if let Some(f) = &post.animation {
        (MediaKind::Animation, f)
    } else if let Some(f) = &post.video {
        (MediaKind::Video, f)
    } else if let Some(f) = &post.document {
        (MediaKind::Document, f)
    } else {
        return None;
    };
    Some(MediaDescriptor {
        kind,
        handle: f.file_id.clone(),
        url: None,
    })
}

/// Map one update to an item, or `None` if it is not a post from a watched channel.
pub fn parse_update(update: &Update, channels: &[String]) -> Option<SourceItem> {
    let post = update.channel_post.as_ref()?;
    if !is_watched(&post.chat, channels) {
        return None;
    }
    if post.pinned_message.is_some() || post.new_chat_title.is_some() {
        return None;
    }

    let text = post
        .text
        .clone()
        .or_else(|| post.caption.clone())
        .unwrap_or_default();
    let media = pick_media(post);
    if text.trim().is_empty() && media.is_none() {
        return None;
    }

    let permalink = post
        .chat
        .username
        .as_deref()
        .map(|u| format!("https://t.me/{u}/{}", post.message_id));

    Some(SourceItem {
        key: ItemKey::new("telegram", format!("{}/{}", post.chat.id, post.message_id)),
        text,
        origin: Origin {
            title: post
                .chat
                .title
                .clone()
                .unwrap_or_else(|| post.chat.id.to_string()),
            handle: post.chat.username.as_ref().map(|u| format!("@{u}")),
            permalink,
        },
        published_at: Utc
            .timestamp_opt(post.date, 0)
            .single()
            .unwrap_or_else(Utc::now),
        engagement: Engagement::default(),
        media,
        kind: SourceKind::Generic,
        forwarded: post.forward_origin.is_some() || post.forward_from_chat.is_some(),
        reply: post.reply_to_message.is_some(),
    })
}

#[async_trait]
impl SourceProvider for TelegramChannelProvider {
    async fn fetch_latest(&self) -> Result<Vec<SourceItem>> {
        let body = serde_json::json!({
            "offset": self.offset.load(Ordering::Acquire),
            "timeout": LONG_POLL_SECS,
            "allowed_updates": ["channel_post"],
        });
        let env = self.api.call::<Vec<Update>>("getUpdates", &body).await?;
        if !env.ok {
            return Err(anyhow!(
                "getUpdates failed ({}): {}",
                env.error_code.unwrap_or_default(),
                env.description()
            ));
        }

        let updates = env.result.unwrap_or_default();
        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            self.offset.store(last + 1, Ordering::Release);
        }
        Ok(updates
            .iter()
            .filter_map(|u| parse_update(u, &self.channels))
            .collect())
    }

    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn verify(&self) -> Result<()> {
        let me = self
            .api
            .call::<serde_json::Value>("getMe", &serde_json::json!({}))
            .await?;
        if !me.ok {
            return Err(anyhow!("getMe rejected the bot token: {}", me.description()));
        }

        let mut reachable = 0usize;
        for ch in &self.channels {
            let chat = self
                .api
                .call::<serde_json::Value>("getChat", &serde_json::json!({ "chat_id": ch }))
                .await?;
            if chat.ok {
                reachable += 1;
            } else {
                tracing::warn!(target: "ingest", channel = %ch, reason = chat.description(), "source channel not reachable");
            }
        }
        if reachable == 0 {
            return Err(anyhow!("none of the configured telegram channels is reachable"));
        }
        Ok(())
    }
}
