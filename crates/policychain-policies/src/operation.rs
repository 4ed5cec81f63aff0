//! Terminal operations — the thing a chain ultimately wraps.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde_json::{json, Value};

use policychain_core::{BoxError, ExecutionContext};

/// The underlying operation executed after every policy's pre-logic.
#[async_trait]
pub trait Operation: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionContext, BoxError>;
}

/// Returns the request, tagged with `"echo": true`.
///
/// Non-object payloads are wrapped as `{"echo": true, "value": …}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoOperation;

#[async_trait]
impl Operation for EchoOperation {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionContext, BoxError> {
        Ok(ctx.map_payload(|payload| match payload {
            Value::Object(mut map) => {
                map.insert("echo".into(), Value::Bool(true));
                Value::Object(map)
            }
            other => json!({ "echo": true, "value": other }),
        }))
    }
}

type OperationFuture = Pin<Box<dyn Future<Output = Result<ExecutionContext, BoxError>> + Send>>;

/// Closure-backed operation.
pub struct FnOperation {
    name: String,
    f: Box<dyn Fn(ExecutionContext) -> OperationFuture + Send + Sync>,
}

impl FnOperation {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ExecutionContext, BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(move |ctx| Box::pin(f(ctx))),
        }
    }
}

#[async_trait]
impl Operation for FnOperation {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionContext, BoxError> {
        (self.f)(ctx).await
    }
}

impl std::fmt::Debug for FnOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnOperation").field("name", &self.name).finish()
    }
}
