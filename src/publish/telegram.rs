// src/publish/telegram.rs
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{PublishError, PublishOutcome, Publisher, DEFAULT_RETRY_AFTER};
use crate::error::Classify;
use crate::ingest::types::{MediaDescriptor, MediaKind};
use crate::telegram::{split_message, ApiEnvelope, BotApi, MAX_CAPTION_CHARS, MAX_MESSAGE_CHARS};

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[a-zA-Z][^>]*>").unwrap());

/// Publishes into one chat with HTML parse mode.
#[derive(Clone)]
pub struct TelegramPublisher {
    api: BotApi,
    chat_id: String,
    max_retries: u8,
}

impl TelegramPublisher {
    pub fn new(api: BotApi, chat_id: impl Into<String>) -> Self {
        Self {
            api,
            chat_id: chat_id.into(),
            max_retries: 3,
        }
    }

    /// One Bot API call; transport failures are retried with backoff.
    async fn call(&self, method: &str, body: serde_json::Value) -> Result<(), PublishError> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            match self.api.call::<serde_json::Value>(method, &body).await {
                Ok(env) => return check(env),
                Err(e) if attempt < self.max_retries => {
                    tracing::debug!(target: "publish", method, attempt, error = %e, "transport error; retrying");
                    tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                }
                Err(e) => return Err(PublishError::Transport(e)),
            }
        }
    }

    async fn send_text(&self, text: &str) -> Result<(), PublishError> {
        for chunk in split_message(text, MAX_MESSAGE_CHARS) {
            let html = serde_json::json!({
                "chat_id": self.chat_id,
                "text": chunk,
                "parse_mode": "HTML",
            });
            match self.call("sendMessage", html).await {
                Err(PublishError::BadMarkup(reason)) => {
                    tracing::warn!(target: "publish", %reason, "HTML rejected; resending as plain text");
                    let plain = serde_json::json!({
                        "chat_id": self.chat_id,
                        "text": strip_tags(&chunk),
                    });
                    self.call("sendMessage", plain).await?;
                }
                other => other?,
            }
        }
        Ok(())
    }

    async fn send_media(&self, media: &MediaDescriptor, caption: &str) -> Result<(), PublishError> {
        let (method, field) = media_method(media.kind);
        let file = if media.handle.is_empty() {
            media.url.clone().unwrap_or_default()
        } else {
            media.handle.clone()
        };
        let mut body = serde_json::json!({
            "chat_id": self.chat_id,
            "caption": caption,
            "parse_mode": "HTML",
        });
        body[field] = serde_json::Value::String(file);
        self.call(method, body).await
    }
}

fn media_method(kind: MediaKind) -> (&'static str, &'static str) {
    match kind {
        MediaKind::Photo => ("sendPhoto", "photo"),
        MediaKind::Video => ("sendVideo", "video"),
        MediaKind::Animation => ("sendAnimation", "animation"),
        MediaKind::Document => ("sendDocument", "document"),
    }
}

pub fn strip_tags(s: &str) -> String {
    let no_tags = RE_TAGS.replace_all(s, "");
    html_escape::decode_html_entities(&no_tags).into_owned()
}

/// Map a Bot API envelope onto the publish error taxonomy.
pub fn check(env: ApiEnvelope<serde_json::Value>) -> Result<(), PublishError> {
    if env.ok {
        return Ok(());
    }
    let code = env.error_code.unwrap_or_default();
    let desc = env.description().to_string();
    let lower = desc.to_ascii_lowercase();

    if code == 429 {
        let wait = env
            .retry_after()
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_AFTER);
        return Err(PublishError::RateLimited(wait));
    }
    if code == 401
        || code == 403
        || lower.contains("not enough rights")
        || lower.contains("chat not found")
        || lower.contains("chat_write_forbidden")
    {
        return Err(PublishError::Forbidden(desc));
    }
    if lower.contains("can't parse entities") {
        return Err(PublishError::BadMarkup(desc));
    }
    Err(PublishError::Api {
        code,
        description: desc,
    })
}

#[async_trait]
impl Publisher for TelegramPublisher {
    async fn publish(&self, text: &str, media: Option<&MediaDescriptor>) -> PublishOutcome {
        let result = match media {
            Some(m) if text.chars().count() <= MAX_CAPTION_CHARS => {
                match self.send_media(m, text).await {
                    // stale file id, unsupported type, bad caption markup
                    Err(e @ (PublishError::Api { .. } | PublishError::BadMarkup(_))) => {
                        tracing::warn!(target: "publish", error = %e, "media send failed; sending text only");
                        self.send_text(text).await
                    }
                    other => other,
                }
            }
            Some(_) => {
                tracing::debug!(target: "publish", "caption too long for media; sending text only");
                self.send_text(text).await
            }
            None => self.send_text(text).await,
        };
        match result {
            Ok(()) => PublishOutcome::Published,
            Err(e) => {
                tracing::warn!(target: "publish", class = %e.class(), error = %e, "send failed");
                e.into()
            }
        }
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(json: &str) -> ApiEnvelope<serde_json::Value> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn flood_wait_becomes_rate_limit() {
        let r = check(env(
            r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 42","parameters":{"retry_after":42}}"#,
        ));
        assert!(matches!(r, Err(PublishError::RateLimited(d)) if d == Duration::from_secs(42)));
    }

    #[test]
    fn missing_rights_is_forbidden() {
        let r = check(env(
            r#"{"ok":false,"error_code":400,"description":"Bad Request: not enough rights to send text messages to the chat"}"#,
        ));
        assert!(matches!(r, Err(PublishError::Forbidden(_))));
        let r = check(env(r#"{"ok":false,"error_code":403,"description":"Forbidden: bot was kicked"}"#));
        assert!(matches!(r, Err(PublishError::Forbidden(_))));
    }

    #[test]
    fn bad_html_is_recognised() {
        let r = check(env(
            r#"{"ok":false,"error_code":400,"description":"Bad Request: can't parse entities: Unsupported start tag \"x\""}"#,
        ));
        assert!(matches!(r, Err(PublishError::BadMarkup(_))));
    }

    #[test]
    fn strip_tags_keeps_text() {
        assert_eq!(strip_tags("<b>Big</b> move &amp; more"), "Big move & more");
    }

    #[test]
    fn media_kinds_pick_methods() {
        assert_eq!(media_method(MediaKind::Animation), ("sendAnimation", "animation"));
        assert_eq!(media_method(MediaKind::Document).0, "sendDocument");
    }
}
