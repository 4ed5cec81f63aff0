//! Policy handler trait + registry of handler builders keyed by policy kind.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use policychain_core::{BoxError, Continuation, ExecutionContext, Policy, StateScope};

use crate::builtin;
use crate::error::ConfigError;

/// The invocation logic of one configured policy instance.
///
/// Instance fields hold configuration-scoped state shared by every
/// execution (a token bucket, a breaker). Anything execution-scoped that
/// must survive awaiting `next` goes into `state`.
#[async_trait]
pub trait PolicyHandler: Send + Sync {
    async fn handle(
        &self,
        next: Continuation,
        ctx: ExecutionContext,
        state: &StateScope,
    ) -> Result<ExecutionContext, BoxError>;
}

/// Builds a handler instance from a policy descriptor.
pub type HandlerBuilder =
    dyn Fn(&Policy) -> Result<Arc<dyn PolicyHandler>, ConfigError> + Send + Sync;

/// Registry of handler builders, keyed by `Policy::kind`.
#[derive(Clone)]
pub struct HandlerRegistry {
    builders: BTreeMap<String, Arc<HandlerBuilder>>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            builders: BTreeMap::new(),
        }
    }

    /// A registry with every built-in policy kind registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// Register (or replace) the builder for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, builder: F)
    where
        F: Fn(&Policy) -> Result<Arc<dyn PolicyHandler>, ConfigError> + Send + Sync + 'static,
    {
        self.builders.insert(kind.into(), Arc::new(builder));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.builders.contains_key(kind)
    }

    /// Registered kinds in sorted order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }

    /// Build the handler for `policy`.
    pub fn instantiate(&self, policy: &Policy) -> Result<Arc<dyn PolicyHandler>, ConfigError> {
        let builder = self
            .builders
            .get(policy.kind())
            .ok_or_else(|| ConfigError::UnknownKind {
                policy: policy.id().to_string(),
                kind: policy.kind().to_string(),
            })?;
        builder(policy)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds().collect::<Vec<_>>())
            .finish()
    }
}

/// Deserialize a policy's config; a missing (`null`) config yields `T::default()`.
pub fn parse_config<T: DeserializeOwned + Default>(policy: &Policy) -> Result<T, ConfigError> {
    if policy.config().is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(policy.config().clone()).map_err(|e| ConfigError::InvalidPolicy {
        policy: policy.id().to_string(),
        reason: e.to_string(),
    })
}
