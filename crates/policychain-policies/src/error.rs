//! Error types for built-in policies and chain configuration.

use thiserror::Error;

use policychain_core::{ComposeError, DomainError};

/// A built-in policy refused to let a request through.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyRejection {
    /// Token bucket is empty — caller should back off.
    #[error("rate limit exceeded (policy: {policy}, retry after {retry_after_ms}ms)")]
    RateLimited { policy: String, retry_after_ms: u64 },

    /// Circuit breaker is open — downstream is considered unhealthy.
    #[error("circuit breaker open (policy: {policy})")]
    CircuitOpen { policy: String },
}

impl PolicyRejection {
    /// Returns `true` if trying again later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Returns `true` unless `err` was caused by a non-retryable rejection.
pub fn is_retryable(err: &DomainError) -> bool {
    err.downcast_cause_ref::<PolicyRejection>()
        .map_or(true, PolicyRejection::is_retryable)
}

/// Errors raised while loading configuration or instantiating policies.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown policy kind '{kind}' for policy '{policy}'")]
    UnknownKind { policy: String, kind: String },

    #[error("duplicate policy id '{0}'")]
    DuplicatePolicy(String),

    #[error("invalid config for policy '{policy}': {reason}")]
    InvalidPolicy { policy: String, reason: String },

    #[error(transparent)]
    Compose(#[from] ComposeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_retryability() {
        let limited = PolicyRejection::RateLimited {
            policy: "rl".into(),
            retry_after_ms: 10,
        };
        let open = PolicyRejection::CircuitOpen { policy: "cb".into() };
        assert!(limited.is_retryable());
        assert!(!open.is_retryable());

        assert!(!is_retryable(&DomainError::new("rejected", open)));
        assert!(is_retryable(&DomainError::new("rejected", limited)));
        assert!(is_retryable(&DomainError::new("boom", "io failure")));
    }
}
