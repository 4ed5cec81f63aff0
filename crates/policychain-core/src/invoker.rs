//! The adapter a concrete chain type implements.

use async_trait::async_trait;

use crate::continuation::Continuation;
use crate::error::BoxError;
use crate::policy::{ExecutionContext, Policy};
use crate::state::StateScope;

/// How one policy and the terminal operation are actually run.
///
/// The composer depends only on this trait. Implementations may complete
/// synchronously or suspend on `next`; either way they must return any
/// failure they do not deliberately recover from, so the composer can
/// normalize it.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; a single invoker serves every
/// concurrent execution of the chains built from it.
#[async_trait]
pub trait PolicyInvoker: Send + Sync + 'static {
    /// Run `policy`'s own logic.
    ///
    /// The policy decides whether, when and with what request to call
    /// `next`, and may transform what `next` returns. Variables that must
    /// outlive a suspension go into `state`, which is released once this
    /// call's future completes or is dropped.
    async fn apply_policy(
        &self,
        policy: &Policy,
        next: Continuation,
        ctx: ExecutionContext,
        state: &StateScope,
    ) -> Result<ExecutionContext, BoxError>;

    /// Run the underlying operation with no further chain.
    async fn apply_terminal(&self, ctx: ExecutionContext) -> Result<ExecutionContext, BoxError>;
}
