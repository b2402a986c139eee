//! Bounded retries with exponential backoff around another gateway.
//!
//! Only failures that can plausibly clear up (timeouts, transport errors,
//! 429 and 5xx) are retried. Once a stream is open its fragments are passed
//! through untouched; a mid-stream failure surfaces to the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{GatewayError, GenerationGateway, GenerationRequest, TextStream};

/// Backoff settings for gateway calls
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each attempt
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (zero-based)
    pub fn delay_for(&self, attempt: u32, err: &GatewayError) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(16));
        let mut millis = self.base_delay_ms.saturating_mul(factor);
        if err.is_rate_limited() {
            millis = millis.saturating_mul(2);
        }
        Duration::from_millis(millis)
    }
}

/// Wraps a gateway with [`RetryPolicy`]
pub struct RetryingGateway {
    inner: Arc<dyn GenerationGateway>,
    policy: RetryPolicy,
}

impl RetryingGateway {
    pub fn new(inner: Arc<dyn GenerationGateway>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn backoff(&self, attempt: u32, err: &GatewayError, request: &GenerationRequest) {
        let delay = self.policy.delay_for(attempt, err);
        tracing::warn!(
            gateway = self.inner.name(),
            step = request.step_tag(),
            attempt = attempt + 1,
            max_retries = self.policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "generation failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl GenerationGateway for RetryingGateway {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<TextStream, GatewayError> {
        let mut attempt = 0;
        loop {
            match self.inner.stream(request).await {
                Ok(stream) => return Ok(stream),
                Err(err) if err.is_retriable() && attempt < self.policy.max_retries => {
                    self.backoff(attempt, &err, request).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GatewayError> {
        let mut attempt = 0;
        loop {
            match self.inner.generate(request).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_retriable() && attempt < self.policy.max_retries => {
                    self.backoff(attempt, &err, request).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
