//! A built chain: the policy list, its adapter and the composed continuation.

use std::sync::Arc;
use std::time::Duration;

use crate::composer::compose;
use crate::continuation::{ChainResult, Continuation};
use crate::error::{ComposeError, DomainError};
use crate::invoker::PolicyInvoker;
use crate::policy::{ExecutionContext, Policy};
use crate::state::ExecutionStateStore;

struct ChainInner {
    policies: Vec<Policy>,
    store: Arc<dyn ExecutionStateStore>,
    continuation: Continuation,
}

/// An immutable, composed policy chain.
///
/// Built once, executed many times. Cloning is cheap and every clone shares
/// the same composed continuation; concurrent executions only share the
/// state store, where their records are keyed by execution id.
#[derive(Clone)]
pub struct PolicyChain {
    inner: Arc<ChainInner>,
}

impl PolicyChain {
    /// Compose `policies` around `invoker`'s terminal operation.
    pub fn new(
        policies: Vec<Policy>,
        invoker: Arc<dyn PolicyInvoker>,
        store: Arc<dyn ExecutionStateStore>,
    ) -> Result<Self, ComposeError> {
        let continuation = compose(&policies, invoker, store.clone())?;
        Ok(Self {
            inner: Arc::new(ChainInner {
                policies,
                store,
                continuation,
            }),
        })
    }

    /// Run one execution through every policy and the terminal operation.
    pub async fn execute(&self, ctx: ExecutionContext) -> ChainResult {
        self.inner.continuation.call(ctx).await
    }

    /// Like [`execute`](Self::execute), but give up after `timeout`.
    ///
    /// On expiry the in-flight layers are dropped, which releases their
    /// state, and the caller gets a `DomainError` caused by the elapsed timer.
    pub async fn execute_with_timeout(&self, ctx: ExecutionContext, timeout: Duration) -> ChainResult {
        let id = ctx.id;
        match tokio::time::timeout(timeout, self.execute(ctx)).await {
            Ok(result) => result,
            Err(elapsed) => {
                tracing::warn!(
                    execution_id = %id,
                    timeout_ms = timeout.as_millis() as u64,
                    "execution timed out"
                );
                Err(DomainError::new(
                    format!("execution {id} timed out after {}ms", timeout.as_millis()),
                    elapsed,
                ))
            }
        }
    }

    /// The composed continuation, for callers that want to nest this chain.
    pub fn continuation(&self) -> Continuation {
        self.inner.continuation.clone()
    }

    pub fn policies(&self) -> &[Policy] {
        &self.inner.policies
    }

    pub fn len(&self) -> usize {
        self.inner.policies.len()
    }

    /// Always `false`; an empty chain cannot be built.
    pub fn is_empty(&self) -> bool {
        self.inner.policies.is_empty()
    }

    pub fn state_store(&self) -> &Arc<dyn ExecutionStateStore> {
        &self.inner.store
    }
}

impl std::fmt::Debug for PolicyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyChain")
            .field(
                "policies",
                &self.inner.policies.iter().map(|p| p.id().as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
