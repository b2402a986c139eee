//! # Opex Models
//!
//! Centralized LLM provider configuration for the generation gateway.
//! Every pipeline stage talks to one configured provider; the provider
//! decides which wire dialect the HTTP gateway speaks.
//!
//! API keys are never stored in configuration. Each provider reads its key
//! from the conventional environment variable:
//! - Anthropic (Claude) - `ANTHROPIC_API_KEY`
//! - OpenAI (GPT) - `OPENAI_API_KEY`
//! - Gemini (Google) - `GEMINI_API_KEY`
//! - OpenRouter (Gateway) - `OPENROUTER_API_KEY`
//! - Grok (xAI) - `XAI_API_KEY`
//! - DeepSeek - `DEEPSEEK_API_KEY`

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported LLM providers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
    Gemini,
    OpenRouter,
    Grok,
    DeepSeek,
}

/// Request/response shape spoken by a provider's HTTP API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireDialect {
    /// `POST {base}/chat/completions`
    OpenAiChat,
    /// `POST {base}/v1/messages`
    AnthropicMessages,
    /// `POST {base}/v1beta/models/{model}:generateContent`
    GeminiGenerate,
}

impl LlmProvider {
    /// Get all available providers
    pub fn all() -> Vec<LlmProvider> {
        vec![
            LlmProvider::Anthropic,
            LlmProvider::OpenAI,
            LlmProvider::Gemini,
            LlmProvider::OpenRouter,
            LlmProvider::Grok,
            LlmProvider::DeepSeek,
        ]
    }

    /// Display name for logs and the config endpoint
    pub fn display_name(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "Anthropic",
            LlmProvider::OpenAI => "OpenAI",
            LlmProvider::Gemini => "Gemini",
            LlmProvider::OpenRouter => "OpenRouter",
            LlmProvider::Grok => "Grok",
            LlmProvider::DeepSeek => "DeepSeek",
        }
    }

    /// Whether this provider supports custom base URL
    pub fn supports_base_url(&self) -> bool {
        matches!(self, LlmProvider::OpenAI)
    }

    /// Environment variable holding the API key
    pub fn api_key_env(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
            LlmProvider::OpenAI => "OPENAI_API_KEY",
            LlmProvider::Gemini => "GEMINI_API_KEY",
            LlmProvider::OpenRouter => "OPENROUTER_API_KEY",
            LlmProvider::Grok => "XAI_API_KEY",
            LlmProvider::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }

    /// Model used when none is configured
    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "claude-sonnet-4-20250514",
            LlmProvider::OpenAI => "gpt-4o",
            LlmProvider::Gemini => "gemini-2.5-pro",
            LlmProvider::OpenRouter => "anthropic/claude-3.5-sonnet",
            LlmProvider::Grok => "grok-2",
            LlmProvider::DeepSeek => "deepseek-chat",
        }
    }

    /// Public API root for the provider
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "https://api.anthropic.com",
            LlmProvider::OpenAI => "https://api.openai.com/v1",
            LlmProvider::Gemini => "https://generativelanguage.googleapis.com",
            LlmProvider::OpenRouter => "https://openrouter.ai/api/v1",
            LlmProvider::Grok => "https://api.x.ai/v1",
            LlmProvider::DeepSeek => "https://api.deepseek.com/v1",
        }
    }

    pub fn dialect(&self) -> WireDialect {
        match self {
            LlmProvider::Anthropic => WireDialect::AnthropicMessages,
            LlmProvider::Gemini => WireDialect::GeminiGenerate,
            LlmProvider::OpenAI
            | LlmProvider::OpenRouter
            | LlmProvider::Grok
            | LlmProvider::DeepSeek => WireDialect::OpenAiChat,
        }
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(LlmProvider::Anthropic),
            "openai" => Ok(LlmProvider::OpenAI),
            "gemini" => Ok(LlmProvider::Gemini),
            "openrouter" => Ok(LlmProvider::OpenRouter),
            "grok" | "xai" => Ok(LlmProvider::Grok),
            "deepseek" => Ok(LlmProvider::DeepSeek),
            other => Err(format!("unknown LLM provider '{}'", other)),
        }
    }
}

fn default_timeout_secs() -> u64 {
    120
}

/// Configuration for LLM model selection
///
/// ## Example
/// ```rust,ignore
/// use opex_core::models::{ModelConfig, LlmProvider};
///
/// // Default Anthropic
/// let config = ModelConfig::default();
///
/// // Specific provider and model behind a local proxy
/// let config = ModelConfig::with_provider(LlmProvider::OpenAI, "gpt-4o")
///     .with_base_url("http://localhost:4000/v1");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    /// LLM provider to use
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model name (e.g., "claude-sonnet-4-20250514", "gpt-4o")
    pub model: String,
    /// Optional base URL override for OpenAI-compatible APIs
    #[serde(default)]
    pub base_url: Option<String>,
    /// Sampling temperature, provider default when unset
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Per-request timeout for non-streaming calls
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::with_provider(LlmProvider::Anthropic, LlmProvider::Anthropic.default_model())
    }
}

impl ModelConfig {
    /// Create a new model config with default provider (Anthropic)
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_provider(LlmProvider::Anthropic, model)
    }

    /// Create config for a specific provider
    pub fn with_provider(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: None,
            temperature: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Set base URL (for OpenAI-compatible endpoints)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Base URL the gateway should call, without a trailing slash
    pub fn resolved_base_url(&self) -> String {
        let base = match &self.base_url {
            Some(url) if self.provider.supports_base_url() => url.as_str(),
            _ => self.provider.default_base_url(),
        };
        base.trim_end_matches('/').to_string()
    }
}
