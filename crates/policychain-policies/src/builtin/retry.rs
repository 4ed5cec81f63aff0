//! Exponential backoff retry policy.
//!
//! Re-invokes `next` with a fresh copy of the request until it succeeds,
//! the failure is not retryable, or `max_retries` is exhausted. The attempt
//! counter lives in the execution's state scope so it survives each
//! backoff sleep and each suspension inside `next`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use policychain_core::{BoxError, Continuation, ExecutionContext, StateScope};

use crate::error::is_retryable;
use crate::handler::PolicyHandler;

const ATTEMPT_SLOT: &str = "attempt";

/// Configuration for the retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    /// Caps exponential growth.
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before the `attempt`-th retry (1-based), `None` once exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        let base_ms = self.config.initial_backoff_ms as f64
            * self.config.multiplier.powi((attempt - 1) as i32);
        let capped = base_ms.min(self.config.max_backoff_ms as f64);
        Some(Duration::from_millis(capped as u64))
    }
}

#[async_trait]
impl PolicyHandler for RetryPolicy {
    async fn handle(
        &self,
        next: Continuation,
        ctx: ExecutionContext,
        state: &StateScope,
    ) -> Result<ExecutionContext, BoxError> {
        loop {
            let attempt = state.get_as::<u32>(ATTEMPT_SLOT)?.unwrap_or(0);
            match next.call(ctx.clone()).await {
                Ok(out) => return Ok(out),
                Err(e) if !is_retryable(&e) => return Err(e.into()),
                Err(e) => {
                    let retry = attempt + 1;
                    let Some(delay) = self.next_delay(retry) else {
                        tracing::error!(
                            policy = %state.policy_id(),
                            execution_id = %ctx.id,
                            attempts = retry,
                            error = %e.report(),
                            "max retries exceeded"
                        );
                        return Err(e.into());
                    };
                    tracing::warn!(
                        policy = %state.policy_id(),
                        execution_id = %ctx.id,
                        attempt = retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %e.report(),
                        "retrying"
                    );
                    state.put_as(ATTEMPT_SLOT, &retry)?;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32, max_backoff_ms: u64, multiplier: f64) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_backoff_ms: 100,
            max_backoff_ms,
            multiplier,
        })
    }

    #[test]
    fn exponential_delays() {
        let p = policy(3, 30_000, 2.0);
        assert_eq!(p.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(p.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(p.next_delay(3), Some(Duration::from_millis(400)));
        assert!(p.next_delay(4).is_none());
    }

    #[test]
    fn delay_capped_at_max() {
        let p = policy(10, 500, 10.0);
        let d5 = p.next_delay(5).unwrap();
        assert_eq!(d5, Duration::from_millis(500));
    }

    #[test]
    fn zero_retries_never_delays() {
        let p = policy(0, 500, 2.0);
        assert!(p.next_delay(1).is_none());
    }
}
