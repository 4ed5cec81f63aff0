//! Three-state circuit breaker policy: Closed → Open → Half-Open.
//!
//! State transitions:
//! - `Closed` → `Open`:      failure count reaches `failure_threshold`
//! - `Open` → `Half-Open`:   `open_duration_ms` has elapsed
//! - `Half-Open` → `Closed`: `success_threshold` probes succeed
//! - `Half-Open` → `Open`:   a probe fails
//!
//! Failures are counted from the outcome of `next`, whatever produced them.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use policychain_core::{BoxError, Continuation, ExecutionContext, PolicyId, StateScope};

use crate::error::PolicyRejection;
use crate::handler::PolicyHandler;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// All executions rejected until `open_duration_ms` elapses.
    Open,
    /// Probe executions allowed to test downstream health.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,
    /// How long to stay open before probing.
    pub open_duration_ms: u64,
    /// Successful probes before closing again.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_ms: 30_000,
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }
}

struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

/// Thread-safe breaker state machine.
#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitInner>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            })),
        }
    }

    /// Current state, moving Open → HalfOpen once the wait has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::Open
            && inner
                .opened_at
                .map_or(false, |at| at.elapsed() >= self.config.open_duration())
        {
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            tracing::info!("circuit breaker → half-open");
        }
        inner.state
    }

    pub fn is_allowed(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                    tracing::info!("circuit breaker → closed");
                }
            }
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(failures = inner.failure_count, "circuit breaker → open");
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.success_count = 0;
                tracing::warn!("circuit breaker probe failed → open");
            }
            CircuitState::Open => {}
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .finish()
    }
}

/// Rejects executions while the breaker is open; feeds `next`'s outcome
/// back into the breaker otherwise.
pub struct CircuitBreakerPolicy {
    id: PolicyId,
    breaker: CircuitBreaker,
}

impl CircuitBreakerPolicy {
    pub fn new(id: PolicyId, config: CircuitBreakerConfig) -> Self {
        Self {
            id,
            breaker: CircuitBreaker::new(config),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl PolicyHandler for CircuitBreakerPolicy {
    async fn handle(
        &self,
        next: Continuation,
        ctx: ExecutionContext,
        _state: &StateScope,
    ) -> Result<ExecutionContext, BoxError> {
        if !self.breaker.is_allowed() {
            tracing::debug!(policy = %self.id, execution_id = %ctx.id, "short-circuited");
            return Err(Box::new(PolicyRejection::CircuitOpen {
                policy: self.id.to_string(),
            }));
        }
        match next.call(ctx).await {
            Ok(out) => {
                self.breaker.record_success();
                Ok(out)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e.into())
            }
        }
    }
}
