//! Built-in policies.
//!
//! A typical outbound stack (applied in order):
//! ```text
//! Request → [logging] → [rate_limit] → [circuit_breaker] → [retry] → [transform] → Operation
//! ```

pub mod circuit_breaker;
pub mod logging;
pub mod rate_limit;
pub mod retry;
pub mod transform;

use std::sync::Arc;

use crate::handler::{parse_config, HandlerRegistry, PolicyHandler};

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState};
pub use logging::{LogLevel, LoggingConfig, LoggingPolicy};
pub use rate_limit::{RateLimitConfig, RateLimitPolicy, TokenBucket};
pub use retry::{RetryConfig, RetryPolicy};
pub use transform::{TransformConfig, TransformPolicy};

pub const RATE_LIMIT: &str = "rate_limit";
pub const CIRCUIT_BREAKER: &str = "circuit_breaker";
pub const RETRY: &str = "retry";
pub const LOGGING: &str = "logging";
pub const TRANSFORM: &str = "transform";

/// Register every built-in kind on `registry`.
pub fn register_all(registry: &mut HandlerRegistry) {
    registry.register(RATE_LIMIT, |policy| {
        let config: RateLimitConfig = parse_config(policy)?;
        config.validate(policy)?;
        Ok(Arc::new(RateLimitPolicy::new(policy.id().clone(), config)) as Arc<dyn PolicyHandler>)
    });
    registry.register(CIRCUIT_BREAKER, |policy| {
        let config: CircuitBreakerConfig = parse_config(policy)?;
        Ok(Arc::new(CircuitBreakerPolicy::new(policy.id().clone(), config)) as Arc<dyn PolicyHandler>)
    });
    registry.register(RETRY, |policy| {
        let config: RetryConfig = parse_config(policy)?;
        Ok(Arc::new(RetryPolicy::new(config)) as Arc<dyn PolicyHandler>)
    });
    registry.register(LOGGING, |policy| {
        let config: LoggingConfig = parse_config(policy)?;
        Ok(Arc::new(LoggingPolicy::new(config)) as Arc<dyn PolicyHandler>)
    });
    registry.register(TRANSFORM, |policy| {
        let config: TransformConfig = parse_config(policy)?;
        Ok(Arc::new(TransformPolicy::new(config)) as Arc<dyn PolicyHandler>)
    });
}
