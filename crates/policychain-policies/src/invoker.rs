//! `RegistryInvoker` — the concrete adapter that runs registry-built
//! handlers as policy hops and an [`Operation`] as the terminal.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use policychain_core::{
    BoxError, Continuation, ExecutionContext, Policy, PolicyId, PolicyInvoker, StateScope,
};

use crate::error::ConfigError;
use crate::handler::{HandlerRegistry, PolicyHandler};
use crate::operation::Operation;

/// Dispatches each policy hop to the handler instantiated for its id.
pub struct RegistryInvoker {
    handlers: HashMap<PolicyId, Arc<dyn PolicyHandler>>,
    operation: Arc<dyn Operation>,
}

impl RegistryInvoker {
    /// Instantiate one handler per policy. Ids must be unique.
    pub fn new(
        registry: &HandlerRegistry,
        policies: &[Policy],
        operation: Arc<dyn Operation>,
    ) -> Result<Self, ConfigError> {
        let mut handlers = HashMap::with_capacity(policies.len());
        for policy in policies {
            if handlers.contains_key(policy.id()) {
                return Err(ConfigError::DuplicatePolicy(policy.id().to_string()));
            }
            handlers.insert(policy.id().clone(), registry.instantiate(policy)?);
        }
        Ok(Self {
            handlers,
            operation,
        })
    }

    pub fn operation(&self) -> &Arc<dyn Operation> {
        &self.operation
    }
}

#[async_trait]
impl PolicyInvoker for RegistryInvoker {
    async fn apply_policy(
        &self,
        policy: &Policy,
        next: Continuation,
        ctx: ExecutionContext,
        state: &StateScope,
    ) -> Result<ExecutionContext, BoxError> {
        let handler = self
            .handlers
            .get(policy.id())
            .ok_or_else(|| format!("no handler instantiated for policy '{}'", policy.id()))?;
        handler.handle(next, ctx, state).await
    }

    async fn apply_terminal(&self, ctx: ExecutionContext) -> Result<ExecutionContext, BoxError> {
        tracing::trace!(operation = self.operation.name(), execution_id = %ctx.id, "running operation");
        self.operation.execute(ctx).await
    }
}

impl std::fmt::Debug for RegistryInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryInvoker")
            .field("policies", &self.handlers.len())
            .field("operation", &self.operation.name())
            .finish()
    }
}
