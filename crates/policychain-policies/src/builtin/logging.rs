//! Logging policy — logs entry and exit of every execution with its
//! latency and outcome.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use policychain_core::{BoxError, Continuation, ExecutionContext, StateScope};

use crate::handler::PolicyHandler;

const ENTERED_SLOT: &str = "entered_at_ms";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// Include request/response payloads in the log lines.
    pub include_payload: bool,
}

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            LogLevel::Trace => tracing::trace!($($arg)+),
            LogLevel::Debug => tracing::debug!($($arg)+),
            LogLevel::Info => tracing::info!($($arg)+),
            LogLevel::Warn => tracing::warn!($($arg)+),
        }
    };
}

pub struct LoggingPolicy {
    config: LoggingConfig,
}

impl LoggingPolicy {
    pub fn new(config: LoggingConfig) -> Self {
        Self { config }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl PolicyHandler for LoggingPolicy {
    async fn handle(
        &self,
        next: Continuation,
        ctx: ExecutionContext,
        state: &StateScope,
    ) -> Result<ExecutionContext, BoxError> {
        let id = ctx.id;
        state.put_as(ENTERED_SLOT, &now_ms())?;
        if self.config.include_payload {
            log_at!(self.config.level, execution_id = %id, payload = %ctx.payload, "enter");
        } else {
            log_at!(self.config.level, execution_id = %id, "enter");
        }

        let outcome = next.call(ctx).await;

        let entered = state
            .get_as::<u64>(ENTERED_SLOT)?
            .ok_or("logging entry time missing from execution state")?;
        let elapsed_ms = now_ms().saturating_sub(entered);
        match &outcome {
            Ok(out) if self.config.include_payload => {
                log_at!(self.config.level, execution_id = %id, elapsed_ms, payload = %out.payload, "exit ok");
            }
            Ok(_) => log_at!(self.config.level, execution_id = %id, elapsed_ms, "exit ok"),
            Err(e) => {
                tracing::warn!(execution_id = %id, elapsed_ms, error = %e.report(), "exit failed")
            }
        }
        Ok(outcome?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_parses_lowercase_levels() {
        let cfg: LoggingConfig =
            serde_json::from_value(json!({ "level": "debug", "include_payload": true })).unwrap();
        assert_eq!(cfg.level, LogLevel::Debug);
        assert!(cfg.include_payload);
        assert_eq!(LoggingConfig::default().level, LogLevel::Info);
    }
}
