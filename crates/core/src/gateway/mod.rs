//! # Generation Gateway
//!
//! The one seam between the pipeline and a text-generation service.
//!
//! ```text
//! Skill ──GenerationRequest──▶ RetryingGateway ──▶ HttpGateway ──▶ provider API
//!   ▲                                                   │
//!   └──────────── text, or ordered fragments ◀──────────┘
//! ```
//!
//! A gateway either returns the completed text (`generate`) or an ordered
//! stream of fragments whose concatenation is the completed text (`stream`).

pub mod http;
pub mod retry;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;
pub mod sse;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;

use crate::config::AgentConfig;

pub use http::HttpGateway;
pub use retry::{RetryPolicy, RetryingGateway};
#[cfg(any(test, feature = "test-util"))]
pub use scripted::ScriptedGateway;

/// Incremental generated text, in order
pub type TextStream = BoxStream<'static, Result<String, GatewayError>>;

/// A single prompt sent to the gateway
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationRequest {
    /// Pipeline step tag, used for log correlation
    pub step: Option<String>,
    /// System instructions
    pub system: String,
    /// User prompt
    pub prompt: String,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    /// Step tag or `-` for logging
    pub fn step_tag(&self) -> &str {
        self.step.as_deref().unwrap_or("-")
    }
}

/// Text generation failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("missing credentials: environment variable {0} is not set")]
    MissingApiKey(String),

    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed provider response: {0}")]
    Decode(String),

    #[error("provider returned no text")]
    Empty,
}

impl GatewayError {
    /// Whether a retry can reasonably succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            GatewayError::Timeout | GatewayError::Transport(_) => true,
            GatewayError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Rate limiting gets a longer backoff
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GatewayError::Http { status: 429, .. })
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// Text-generation capability
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Open an incremental fragment stream
    async fn stream(&self, request: &GenerationRequest) -> Result<TextStream, GatewayError>;

    /// Complete text; by default the concatenated stream
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GatewayError> {
        let mut stream = self.stream(request).await?;
        let mut text = String::new();
        while let Some(fragment) = stream.next().await {
            text.push_str(&fragment?);
        }
        if text.trim().is_empty() {
            return Err(GatewayError::Empty);
        }
        Ok(text)
    }
}

/// Build the process-wide gateway handle: HTTP provider wrapped in retries
pub fn from_config(config: &AgentConfig) -> Result<Arc<dyn GenerationGateway>, GatewayError> {
    let http = HttpGateway::from_env(config.model.clone())?;
    tracing::info!(
        provider = config.model.provider.display_name(),
        model = %config.model.model,
        max_retries = config.retry.max_retries,
        "generation gateway ready"
    );
    Ok(Arc::new(RetryingGateway::new(Arc::new(http), config.retry)))
}
