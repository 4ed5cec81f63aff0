//! Error types for chain construction and execution.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::policy::PolicyId;

/// Any failure a policy hop or the terminal operation may raise.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors raised while building a chain.
///
/// These are never observed per execution; a chain that fails to build
/// simply does not exist.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// The policy sequence (or another construction input) is unusable.
    #[error("invalid chain configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

impl ComposeError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}

/// Where in the chain a failure was first observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOrigin {
    /// Raised by the policy at `position`.
    Policy { id: PolicyId, position: usize },
    /// Raised by the terminal operation.
    Terminal,
    /// Constructed directly by policy or caller code.
    Unattributed,
}

impl fmt::Display for FailureOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Policy { id, position } => write!(f, "policy '{id}' (#{position})"),
            Self::Terminal => write!(f, "terminal operation"),
            Self::Unattributed => write!(f, "unattributed"),
        }
    }
}

/// The single failure kind a caller of a composed chain ever observes.
///
/// Always carries the original cause. A failure that already is a
/// `DomainError` passes through every layer untouched.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DomainError {
    message: String,
    origin: FailureOrigin,
    wrapped: bool,
    #[source]
    cause: BoxError,
}

impl DomainError {
    /// Build a domain error directly from a cause, e.g. a policy rejection.
    pub fn new(message: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            origin: FailureOrigin::Unattributed,
            wrapped: false,
            cause: cause.into(),
        }
    }

    /// Wrap a foreign failure observed at `origin`.
    pub(crate) fn wrap(cause: BoxError, origin: FailureOrigin) -> Self {
        Self {
            message: format!("{origin} failed"),
            origin,
            wrapped: true,
            cause,
        }
    }

    /// Normalize an arbitrary hop failure into a `DomainError`.
    ///
    /// Already-domain failures are returned unchanged; anything else is
    /// wrapped exactly once with `origin` attached.
    pub fn normalize(err: BoxError, origin: FailureOrigin) -> Self {
        match err.downcast::<DomainError>() {
            Ok(domain) => *domain,
            Err(foreign) => {
                tracing::debug!(%origin, error = %foreign, "normalizing foreign failure");
                Self::wrap(foreign, origin)
            }
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn origin(&self) -> &FailureOrigin {
        &self.origin
    }

    /// `true` if this error was produced by normalizing a foreign failure.
    pub fn is_wrapped(&self) -> bool {
        self.wrapped
    }

    /// The original failure.
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    pub fn cause_is<E: StdError + 'static>(&self) -> bool {
        self.cause.is::<E>()
    }

    pub fn downcast_cause_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.cause.downcast_ref::<E>()
    }

    /// Consume the error and return its cause.
    pub fn into_cause(self) -> BoxError {
        self.cause
    }

    /// Render the message followed by every `source()` in the chain.
    pub fn report(&self) -> String {
        let mut out = self.message.clone();
        let mut source = StdError::source(self);
        while let Some(err) = source {
            out.push_str(&format!("\n  caused by: {err}"));
            source = err.source();
        }
        out
    }
}
