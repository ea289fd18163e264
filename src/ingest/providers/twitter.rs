// src/ingest/providers/twitter.rs
//! X API v2 user timelines. Retweets and replies are excluded server-side.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::ingest::types::{
    Engagement, ItemKey, Origin, SourceItem, SourceKind, SourceProvider,
};

const API_BASE: &str = "https://api.twitter.com/2";
const MAX_RESULTS: u32 = 10;

#[derive(Debug, Deserialize)]
struct UserLookup {
    data: Option<UserData>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub data: Vec<Tweet>,
}

#[derive(Debug, Deserialize)]
pub struct Tweet {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub public_metrics: Option<PublicMetrics>,
    #[serde(default)]
    pub referenced_tweets: Vec<ReferencedTweet>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PublicMetrics {
    #[serde(default)]
    pub retweet_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub quote_count: u64,
    #[serde(default)]
    pub impression_count: u64,
}

#[derive(Debug, Deserialize)]
pub struct ReferencedTweet {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Default)]
struct AccountState {
    user_id: Option<String>,
    since_id: Option<String>,
    /// Set after the first poll, even when it returned nothing.
    primed: bool,
}

impl AccountState {
    /// Advance the marker past `timeline`. The first poll only primes the
    /// marker so history is not replayed.
    fn advance(&mut self, username: &str, timeline: Timeline) -> Vec<SourceItem> {
        let newest = timeline
            .data
            .iter()
            .map(|t| t.id.as_str())
            .max_by(|a, b| compare_ids(a, b))
            .map(str::to_string);
        if let Some(n) = newest {
            self.since_id = Some(n);
        }
        if !std::mem::replace(&mut self.primed, true) {
            return Vec::new();
        }
        timeline_to_items(username, timeline)
    }
}

pub struct TwitterProvider {
    http: reqwest::Client,
    base: String,
    bearer: String,
    accounts: Vec<String>,
    state: Mutex<HashMap<String, AccountState>>,
}

impl TwitterProvider {
    pub fn new(bearer: String, accounts: Vec<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("rewrite-relay/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .context("building twitter http client")?;
        Ok(Self {
            http,
            base: API_BASE.to_string(),
            bearer,
            accounts,
            state: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base = base.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.bearer)
            .query(query)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("X API {status}: {}", body.chars().take(200).collect::<String>()));
        }
        Ok(resp.json::<T>().await?)
    }

    async fn user_id(&self, username: &str) -> Result<String> {
        let url = format!("{}/users/by/username/{username}", self.base);
        let lookup: UserLookup = self.get_json(&url, &[]).await?;
        lookup
            .data
            .map(|d| d.id)
            .ok_or_else(|| anyhow!("X user @{username} not found"))
    }

    async fn fetch_account(&self, username: &str) -> Result<Vec<SourceItem>> {
        let (user_id, since_id) = {
            let st = self.state.lock().await;
            let s = st.get(username);
            (
                s.and_then(|s| s.user_id.clone()),
                s.and_then(|s| s.since_id.clone()),
            )
        };
        let user_id = match user_id {
            Some(id) => id,
            None => self.user_id(username).await?,
        };

        let mut query = vec![
            ("max_results", MAX_RESULTS.to_string()),
            ("exclude", "retweets,replies".to_string()),
            (
                "tweet.fields",
                "created_at,public_metrics,referenced_tweets".to_string(),
            ),
        ];
        if let Some(since) = &since_id {
            query.push(("since_id", since.clone()));
        }
        let url = format!("{}/users/{user_id}/tweets", self.base);
        let timeline: Timeline = self.get_json(&url, &query).await?;

        let mut st = self.state.lock().await;
        let entry = st.entry(username.to_string()).or_default();
        entry.user_id = Some(user_id);
        Ok(entry.advance(username, timeline))
    }
}

/// Tweet ids are decimal snowflakes; longer means newer.
fn compare_ids(a: &str, b: &str) -> std::cmp::Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

pub fn permalink(username: &str, id: &str) -> String {
    format!("https://twitter.com/{username}/status/{id}")
}

pub fn timeline_to_items(username: &str, timeline: Timeline) -> Vec<SourceItem> {
    timeline
        .data
        .into_iter()
        .map(|t| {
            let m = t.public_metrics.unwrap_or_default();
            let link = permalink(username, &t.id);
            let is_kind = |k: &str| t.referenced_tweets.iter().any(|r| r.kind == k);
            SourceItem {
                key: ItemKey::new("twitter", t.id.clone()),
                forwarded: is_kind("retweeted"),
                reply: is_kind("replied_to"),
                text: t.text,
                origin: Origin {
                    title: format!("@{username}"),
                    handle: Some(format!("@{username}")),
                    permalink: Some(link.clone()),
                },
                published_at: t.created_at.unwrap_or_else(Utc::now),
                engagement: Engagement {
                    views: m.impression_count,
                    likes: m.like_count,
                    forwards: m.retweet_count + m.quote_count,
                },
                media: None,
                kind: SourceKind::Attributed { reference: link },
            }
        })
        .collect()
}

#[async_trait]
impl SourceProvider for TwitterProvider {
    async fn fetch_latest(&self) -> Result<Vec<SourceItem>> {
        let mut out = Vec::new();
        let mut failed = 0usize;
        let mut last_err = None;
        for acc in &self.accounts {
            match self.fetch_account(acc).await {
                Ok(mut v) => out.append(&mut v),
                Err(e) => {
                    tracing::warn!(target: "ingest", account = %acc, error = %e, "timeline fetch failed");
                    failed += 1;
                    last_err = Some(e);
                }
            }
        }
        // partial failure is not a provider error
        match last_err {
            Some(e) if failed == self.accounts.len() => Err(e),
            _ => Ok(out),
        }
    }

    fn name(&self) -> &'static str {
        "twitter"
    }

    async fn verify(&self) -> Result<()> {
        let mut ok = 0usize;
        for acc in &self.accounts {
            match self.user_id(acc).await {
                Ok(id) => {
                    self.state.lock().await.entry(acc.clone()).or_default().user_id = Some(id);
                    ok += 1;
                }
                Err(e) => tracing::warn!(target: "ingest", account = %acc, error = %e, "account lookup failed"),
            }
        }
        if ok == 0 {
            return Err(anyhow!("none of the configured X accounts could be resolved"));
        }
        Ok(())
    }
}
