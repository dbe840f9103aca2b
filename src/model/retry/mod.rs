//! Exponential-backoff retry for transient gateway faults.
//!
//! This sits beneath evaluation-gated retry: one evaluation attempt may
//! absorb several transient faults before it produces a draft.


use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{ModelError, ModelGateway, ModelInvocationRequest, ModelInvocationResult};
use crate::config::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    #[inline]
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            multiplier: config.multiplier,
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt `attempt` (1-based)
    #[inline]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_ms = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        if !delay_ms.is_finite() || delay_ms >= self.max_backoff.as_millis() as f64 {
            self.max_backoff
        } else {
            Duration::from_millis(delay_ms.round() as u64)
        }
    }
}

/// Wraps a gateway and retries transient faults with exponential backoff
pub struct RetryingGateway {
    inner: Arc<dyn ModelGateway>,
    policy: RetryPolicy,
}

impl RetryingGateway {
    #[inline]
    pub fn new(inner: Arc<dyn ModelGateway>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    #[inline]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl ModelGateway for RetryingGateway {
    #[inline]
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    #[inline]
    async fn invoke(
        &self,
        request: &ModelInvocationRequest,
    ) -> Result<ModelInvocationResult, ModelError> {
        let mut attempt = 1;
        loop {
            match self.inner.invoke(request).await {
                Err(ModelError::Transient { message }) => {
                    if attempt >= self.policy.max_attempts {
                        return Err(ModelError::UpstreamUnavailable {
                            attempts: attempt,
                            last: message,
                        });
                    }
                    let delay = self.policy.backoff_for(attempt);
                    warn!(
                        "Transient fault from {} on attempt {}/{}: {}. Retrying in {:?}",
                        self.inner.model_name(),
                        attempt,
                        self.policy.max_attempts,
                        message,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
