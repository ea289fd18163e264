// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::env;

fn default_provider() -> String {
    "local".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

/// Rewrite backends the relay knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    DeepSeek,
    Groq,
    Ollama,
    Local,
}

impl ProviderKind {
    /// Case-insensitive; `"fallback"` and `"template"` are accepted as aliases of local.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "anthropic" | "claude" => Some(Self::Anthropic),
            "deepseek" => Some(Self::DeepSeek),
            "groq" => Some(Self::Groq),
            "ollama" => Some(Self::Ollama),
            "local" | "fallback" | "template" => Some(Self::Local),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::DeepSeek => "deepseek",
            Self::Groq => "groq",
            Self::Ollama => "ollama",
            Self::Local => "local",
        }
    }

    /// Env var consulted when `api_key = "ENV"`. `None` means no key is needed.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::DeepSeek => Some("DEEPSEEK_API_KEY"),
            Self::Groq => Some("GROQ_API_KEY"),
            Self::Ollama | Self::Local => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-mini",
            Self::Anthropic => "claude-3-5-haiku-latest",
            Self::DeepSeek => "deepseek-chat",
            Self::Groq => "llama-3.1-8b-instant",
            Self::Ollama => "llama3.1:8b",
            Self::Local => "template",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com",
            Self::DeepSeek => "https://api.deepseek.com",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Ollama => "http://localhost:11434/v1",
            Self::Local => "",
        }
    }
}

/// `[rewrite]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// "openai" | "anthropic" | "deepseek" | "groq" | "ollama" | "local" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// "ENV" means: read from the provider's env var (OPENAI_API_KEY, ...)
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Per-call budget for the backend; exceeding it falls back to the template.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_key: default_api_key(),
            base_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl AiConfig {
    pub fn provider_kind(&self) -> anyhow::Result<ProviderKind> {
        ProviderKind::parse(&self.provider)
            .ok_or_else(|| anyhow::anyhow!("Unsupported rewrite provider in config: {}", self.provider))
    }

    pub fn model_or_default(&self) -> String {
        match self.model.as_deref().map(str::trim) {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => self
                .provider_kind()
                .map(|k| k.default_model())
                .unwrap_or("template")
                .to_string(),
        }
    }

    pub fn base_url_or_default(&self) -> String {
        match self.base_url.as_deref().map(str::trim) {
            Some(u) if !u.is_empty() => u.trim_end_matches('/').to_string(),
            _ => self
                .provider_kind()
                .map(|k| k.default_base_url())
                .unwrap_or_default()
                .to_string(),
        }
    }

    /// Normalize the provider name and resolve an `"ENV"` api key.
    pub fn resolve(&mut self) -> anyhow::Result<()> {
        let kind = self.provider_kind()?;
        self.provider = kind.as_str().to_string();

        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = match kind.api_key_env() {
                Some(var) => env::var(var)
                    .map_err(|_| anyhow::anyhow!("Missing {var} env var for provider {}", kind.as_str()))?,
                None => String::new(),
            };
        }
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        Ok(())
    }
}
