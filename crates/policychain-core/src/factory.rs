//! Composer factory — binds a shared state store once and builds chains for
//! each operation invocation site.

use std::sync::Arc;

use crate::chain::PolicyChain;
use crate::error::ComposeError;
use crate::invoker::PolicyInvoker;
use crate::policy::Policy;
use crate::state::{ExecutionStateStore, InMemoryStateStore};

/// Builds [`PolicyChain`]s that all share one execution state store.
#[derive(Clone)]
pub struct ChainFactory {
    store: Arc<dyn ExecutionStateStore>,
}

impl ChainFactory {
    pub fn new(store: Arc<dyn ExecutionStateStore>) -> Self {
        Self { store }
    }

    /// Build a chain for one operation.
    pub fn create(
        &self,
        policies: Vec<Policy>,
        invoker: Arc<dyn PolicyInvoker>,
    ) -> Result<PolicyChain, ComposeError> {
        PolicyChain::new(policies, invoker, self.store.clone())
    }

    pub fn state_store(&self) -> &Arc<dyn ExecutionStateStore> {
        &self.store
    }
}

impl Default for ChainFactory {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryStateStore::new()))
    }
}

impl std::fmt::Debug for ChainFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainFactory").finish_non_exhaustive()
    }
}
