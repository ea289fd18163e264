// src/rewrite/backends.rs
//! Network rewrite backends. OpenAI, DeepSeek, Groq and Ollama all speak the
//! chat-completions dialect; Anthropic has its own messages API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};

use super::prompt::CompletionRequest;
use super::{RewriteBackend, RewriteError};
use crate::ingest::types::SourceItem;

const ANTHROPIC_VERSION: &str = "2023-06-01";

fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("rewrite-relay/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .build()
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Turn a non-2xx response into the matching error.
async fn status_error(backend: &'static str, resp: reqwest::Response) -> RewriteError {
    let status = resp.status();
    match status {
        StatusCode::TOO_MANY_REQUESTS => RewriteError::RateLimited {
            backend,
            retry_after: retry_after(&resp),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RewriteError::Auth { backend },
        _ => {
            let body = resp.text().await.unwrap_or_default();
            RewriteError::Status {
                backend,
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            }
        }
    }
}

fn request_error(backend: &'static str, e: reqwest::Error) -> RewriteError {
    RewriteError::Request {
        backend,
        reason: e.to_string(),
    }
}

/// `/chat/completions` client used for every OpenAI-compatible vendor.
pub struct OpenAiCompatible {
    http: reqwest::Client,
    name: &'static str,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatible {
    pub fn new(
        name: &'static str,
        base_url: String,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            name,
            base_url,
            api_key,
            model,
        })
    }
}

#[derive(Serialize)]
struct ChatMsg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatReq<'a> {
    model: &'a str,
    messages: Vec<ChatMsg<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResp {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMsg,
}

#[derive(Deserialize)]
struct ChatChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl RewriteBackend for OpenAiCompatible {
    async fn rewrite_text(&self, item: &SourceItem) -> Result<String, RewriteError> {
        let req = CompletionRequest::for_item(item);
        let body = ChatReq {
            model: &self.model,
            messages: vec![
                ChatMsg {
                    role: "system",
                    content: &req.system,
                },
                ChatMsg {
                    role: "user",
                    content: &req.user,
                },
            ],
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        };

        let mut rb = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        // ollama runs without a key
        if !self.api_key.is_empty() {
            rb = rb.bearer_auth(&self.api_key);
        }
        let resp = rb.send().await.map_err(|e| request_error(self.name, e))?;
        if !resp.status().is_success() {
            return Err(status_error(self.name, resp).await);
        }

        let parsed: ChatResp = resp.json().await.map_err(|e| request_error(self.name, e))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        non_empty(self.name, text)
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Anthropic messages API.
pub struct Anthropic {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl Anthropic {
    pub fn new(base_url: String, api_key: String, model: String, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url,
            api_key,
            model,
        })
    }
}

#[derive(Serialize)]
struct MessagesReq<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<ChatMsg<'a>>,
}

#[derive(Deserialize)]
struct MessagesResp {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl RewriteBackend for Anthropic {
    async fn rewrite_text(&self, item: &SourceItem) -> Result<String, RewriteError> {
        let req = CompletionRequest::for_item(item);
        let body = MessagesReq {
            model: &self.model,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            system: &req.system,
            messages: vec![ChatMsg {
                role: "user",
                content: &req.user,
            }],
        };

        let resp = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error("anthropic", e))?;
        if !resp.status().is_success() {
            return Err(status_error("anthropic", resp).await);
        }

        let parsed: MessagesResp = resp.json().await.map_err(|e| request_error("anthropic", e))?;
        let text = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("\n");
        non_empty("anthropic", text)
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn non_empty(backend: &'static str, text: String) -> Result<String, RewriteError> {
    let t = text.trim();
    if t.is_empty() {
        Err(RewriteError::Empty { backend })
    } else {
        Ok(t.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_only_output_is_empty() {
        assert!(matches!(
            non_empty("openai", "  \n ".into()),
            Err(RewriteError::Empty { backend: "openai" })
        ));
        assert_eq!(non_empty("groq", " ok \n".into()).unwrap(), "ok");
    }

    #[test]
    fn chat_response_without_content_parses() {
        let r: ChatResp =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#).unwrap();
        assert!(r.choices[0].message.content.is_none());
    }

    #[test]
    fn anthropic_text_blocks_are_joined() {
        let r: MessagesResp = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"a"},{"type":"tool_use","id":"x"},{"type":"text","text":"b"}]}"#,
        )
        .unwrap();
        let texts: Vec<_> = r.content.into_iter().filter(|b| b.kind == "text").filter_map(|b| b.text).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }
}
