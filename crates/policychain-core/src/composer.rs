//! Chain composer — folds an ordered policy list and a terminal operation
//! into a single continuation.
//!
//! ```text
//! call ─▶ [p0 ─▶ [p1 ─▶ … [p(n-1) ─▶ [terminal]]]]
//! ```
//!
//! The fold runs right to left: the terminal layer is the only continuation
//! known up front, and each policy layer closes over the one built before it.
//! Every layer normalizes its own failure, so the caller only ever sees a
//! [`DomainError`] and a foreign failure is wrapped exactly once, at the
//! layer where it occurred.

use std::sync::Arc;

use tracing::Instrument;

use crate::continuation::Continuation;
use crate::error::{ComposeError, DomainError, FailureOrigin};
use crate::invoker::PolicyInvoker;
use crate::policy::{ExecutionContext, Policy};
use crate::state::{ExecutionStateStore, StateScope};

/// Compose `policies` around `invoker`'s terminal operation.
///
/// Fails with [`ComposeError::InvalidConfiguration`] if `policies` is empty.
/// No I/O and no state store access happen here.
pub fn compose(
    policies: &[Policy],
    invoker: Arc<dyn PolicyInvoker>,
    store: Arc<dyn ExecutionStateStore>,
) -> Result<Continuation, ComposeError> {
    if policies.is_empty() {
        return Err(ComposeError::invalid("policies list cannot be empty"));
    }

    let terminal = terminal_layer(invoker.clone());
    let composed = policies
        .iter()
        .enumerate()
        .rev()
        .fold(terminal, |next, (position, policy)| {
            policy_layer(
                Arc::new(policy.clone()),
                position,
                next,
                invoker.clone(),
                store.clone(),
            )
        });

    let order: Vec<&str> = policies.iter().map(|p| p.id().as_str()).collect();
    tracing::debug!(
        policies = policies.len(),
        chain = %order.join(" -> "),
        "composed policy chain"
    );
    Ok(composed)
}

fn terminal_layer(invoker: Arc<dyn PolicyInvoker>) -> Continuation {
    Continuation::new(move |ctx: ExecutionContext| {
        let invoker = invoker.clone();
        let span = tracing::debug_span!("terminal", execution_id = %ctx.id);
        async move {
            invoker
                .apply_terminal(ctx)
                .await
                .map_err(|err| DomainError::normalize(err, FailureOrigin::Terminal))
        }
        .instrument(span)
    })
}

fn policy_layer(
    policy: Arc<Policy>,
    position: usize,
    next: Continuation,
    invoker: Arc<dyn PolicyInvoker>,
    store: Arc<dyn ExecutionStateStore>,
) -> Continuation {
    Continuation::new(move |ctx: ExecutionContext| {
        let policy = policy.clone();
        let next = next.clone();
        let invoker = invoker.clone();
        let store = store.clone();
        let span = tracing::debug_span!(
            "policy",
            execution_id = %ctx.id,
            policy = %policy.id(),
            position
        );
        async move {
            // Owned by this future: dropped on return, on error and on cancellation.
            let scope = StateScope::new(store, ctx.id, policy.id().clone(), position);
            let outcome = invoker.apply_policy(&policy, next, ctx, &scope).await;
            drop(scope);
            outcome.map_err(|err| {
                DomainError::normalize(
                    err,
                    FailureOrigin::Policy {
                        id: policy.id().clone(),
                        position,
                    },
                )
            })
        }
        .instrument(span)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::state::InMemoryStateStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Appends `>id` on the way in and `<id` on the way out.
    struct Recording {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PolicyInvoker for Recording {
        async fn apply_policy(
            &self,
            policy: &Policy,
            next: Continuation,
            ctx: ExecutionContext,
            _state: &StateScope,
        ) -> Result<ExecutionContext, BoxError> {
            self.log.lock().unwrap().push(format!(">{}", policy.id()));
            let out = next.call(ctx).await?;
            self.log.lock().unwrap().push(format!("<{}", policy.id()));
            Ok(out)
        }

        async fn apply_terminal(&self, ctx: ExecutionContext) -> Result<ExecutionContext, BoxError> {
            self.log.lock().unwrap().push("terminal".into());
            Ok(ctx)
        }
    }

    fn recording() -> (Arc<dyn PolicyInvoker>, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (Arc::new(Recording { log: log.clone() }), log)
    }

    #[test]
    fn empty_policies_rejected() {
        let (invoker, _) = recording();
        let err = compose(&[], invoker, Arc::new(InMemoryStateStore::new())).unwrap_err();
        assert!(matches!(err, ComposeError::InvalidConfiguration { .. }));
    }

    #[tokio::test]
    async fn single_policy_wraps_terminal() {
        let (invoker, log) = recording();
        let chain = compose(
            &[Policy::new("only", "noop")],
            invoker,
            Arc::new(InMemoryStateStore::new()),
        )
        .unwrap();

        chain.call(ExecutionContext::new(json!(null))).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![">only", "terminal", "<only"]);
    }

    #[tokio::test]
    async fn nested_order() {
        let (invoker, log) = recording();
        let policies = vec![
            Policy::new("a", "noop"),
            Policy::new("b", "noop"),
            Policy::new("c", "noop"),
        ];
        let chain = compose(&policies, invoker, Arc::new(InMemoryStateStore::new())).unwrap();

        chain.call(ExecutionContext::new(json!(null))).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec![">a", ">b", ">c", "terminal", "<c", "<b", "<a"]
        );
    }

    #[tokio::test]
    async fn composing_touches_no_state() {
        let (invoker, log) = recording();
        let store = Arc::new(InMemoryStateStore::new());
        let _chain = compose(&[Policy::new("a", "noop")], invoker, store.clone()).unwrap();
        assert!(log.lock().unwrap().is_empty());
        assert!(store.is_empty());
    }
}
