//! Payload transform policy — merges fixed fields into the request before
//! delegating and into the result afterwards.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use policychain_core::{BoxError, Continuation, ExecutionContext, StateScope};

use crate::handler::PolicyHandler;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Fields merged into the request payload.
    pub request: Map<String, Value>,
    /// Fields merged into the result payload.
    pub response: Map<String, Value>,
    /// Attributes set on the request.
    pub attributes: BTreeMap<String, String>,
}

pub struct TransformPolicy {
    config: TransformConfig,
}

impl TransformPolicy {
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }
}

fn merge(payload: Value, fields: &Map<String, Value>) -> Result<Value, BoxError> {
    if fields.is_empty() {
        return Ok(payload);
    }
    match payload {
        Value::Object(mut map) => {
            for (k, v) in fields {
                map.insert(k.clone(), v.clone());
            }
            Ok(Value::Object(map))
        }
        Value::Null => Ok(Value::Object(fields.clone())),
        other => Err(format!("transform requires an object payload, got {other}").into()),
    }
}

#[async_trait]
impl PolicyHandler for TransformPolicy {
    async fn handle(
        &self,
        next: Continuation,
        mut ctx: ExecutionContext,
        _state: &StateScope,
    ) -> Result<ExecutionContext, BoxError> {
        ctx.payload = merge(std::mem::take(&mut ctx.payload), &self.config.request)?;
        for (k, v) in &self.config.attributes {
            ctx.attributes.insert(k.clone(), v.clone());
        }

        let mut out = next.call(ctx).await?;
        out.payload = merge(std::mem::take(&mut out.payload), &self.config.response)?;
        Ok(out)
    }
}
