//! Token bucket rate limiting policy.
//!
//! Tokens accrue at `refill_rate` tokens/second up to `capacity`. Each
//! execution consumes `cost` tokens. When the bucket is short, the policy
//! either rejects with [`PolicyRejection::RateLimited`] or, with `wait`
//! set, sleeps until the tokens are available.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use policychain_core::{BoxError, Continuation, ExecutionContext, Policy, PolicyId, StateScope};

use crate::error::{ConfigError, PolicyRejection};
use crate::handler::PolicyHandler;

/// Rate limit configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum tokens in the bucket.
    pub capacity: f64,
    /// Token refill rate (tokens per second).
    pub refill_rate: f64,
    /// Tokens consumed per execution.
    pub cost: f64,
    /// Wait for tokens instead of rejecting.
    pub wait: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 100.0,
            refill_rate: 100.0,
            cost: 1.0,
            wait: false,
        }
    }
}

impl RateLimitConfig {
    pub(crate) fn validate(&self, policy: &Policy) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPolicy {
            policy: policy.id().to_string(),
            reason: reason.to_string(),
        };
        if !(self.capacity.is_finite() && self.cost.is_finite() && self.refill_rate.is_finite()) {
            return Err(invalid("capacity, cost and refill_rate must be finite"));
        }
        if self.capacity <= 0.0 {
            return Err(invalid("capacity must be positive"));
        }
        if self.cost <= 0.0 || self.cost > self.capacity {
            return Err(invalid("cost must be positive and no larger than capacity"));
        }
        if self.refill_rate < 0.0 {
            return Err(invalid("refill_rate must not be negative"));
        }
        if self.wait && self.refill_rate == 0.0 {
            return Err(invalid("wait requires a positive refill_rate"));
        }
        Ok(())
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Thread-safe token bucket.
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Consume `cost` tokens if available.
    pub fn try_acquire(&self, cost: f64) -> bool {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        if state.tokens >= cost {
            state.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Estimated wait before `cost` tokens are available. Saturates at
    /// `Duration::MAX` when the refill rate is too slow to represent.
    pub fn wait_time(&self, cost: f64) -> Duration {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        let deficit = cost - state.tokens;
        if deficit <= 0.0 || self.refill_rate <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(deficit / self.refill_rate).unwrap_or(Duration::MAX)
        }
    }

    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }
}

/// Rate limiting policy; one bucket per configured policy instance, shared
/// by every execution passing through it.
pub struct RateLimitPolicy {
    id: PolicyId,
    config: RateLimitConfig,
    bucket: TokenBucket,
}

impl RateLimitPolicy {
    pub fn new(id: PolicyId, config: RateLimitConfig) -> Self {
        Self {
            bucket: TokenBucket::new(config.capacity, config.refill_rate),
            id,
            config,
        }
    }

    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }
}

#[async_trait]
impl PolicyHandler for RateLimitPolicy {
    async fn handle(
        &self,
        next: Continuation,
        ctx: ExecutionContext,
        _state: &StateScope,
    ) -> Result<ExecutionContext, BoxError> {
        while !self.bucket.try_acquire(self.config.cost) {
            let wait = self.bucket.wait_time(self.config.cost);
            let wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
            if !self.config.wait {
                tracing::warn!(policy = %self.id, retry_after_ms = wait_ms, "rate limited");
                return Err(Box::new(PolicyRejection::RateLimited {
                    policy: self.id.to_string(),
                    retry_after_ms: wait_ms,
                }));
            }
            tracing::debug!(policy = %self.id, wait_ms, "rate limited, backing off");
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
        Ok(next.call(ctx).await?)
    }
}
