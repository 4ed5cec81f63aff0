//! Continuations — "the rest of the chain from here".

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::DomainError;
use crate::policy::ExecutionContext;

/// Outcome of running a continuation.
pub type ChainResult = Result<ExecutionContext, DomainError>;

/// Boxed future returned by [`Continuation::call`].
pub type ChainFuture = BoxFuture<'static, ChainResult>;

type ContinuationFn = dyn Fn(ExecutionContext) -> ChainFuture + Send + Sync;

/// A callable representing everything after a given point in a chain.
///
/// Cheap to clone and safe to invoke concurrently; a continuation holds no
/// execution-scoped state of its own.
#[derive(Clone)]
pub struct Continuation {
    f: Arc<ContinuationFn>,
}

impl Continuation {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ChainResult> + Send + 'static,
    {
        Self {
            f: Arc::new(move |ctx| Box::pin(f(ctx))),
        }
    }

    /// Run the rest of the chain with `ctx`.
    ///
    /// Dropping the returned future before it resolves cancels every layer
    /// below this point.
    pub fn call(&self, ctx: ExecutionContext) -> ChainFuture {
        (self.f)(ctx)
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation").finish_non_exhaustive()
    }
}
