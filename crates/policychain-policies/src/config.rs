//! Chain configuration — YAML or JSON files describing an ordered policy
//! list plus logging settings.
//!
//! ```yaml
//! name: orders-api
//! log:
//!   level: info
//! policies:
//!   - id: audit
//!     kind: logging
//!   - id: throttle
//!     kind: rate_limit
//!     config: { capacity: 50, refill_rate: 10 }
//!   - id: retry
//!     kind: retry
//!     config: { max_retries: 2, initial_backoff_ms: 50 }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use policychain_core::{ChainFactory, ComposeError, Policy, PolicyChain};

use crate::error::ConfigError;
use crate::handler::HandlerRegistry;
use crate::invoker::RegistryInvoker;
use crate::operation::Operation;

/// One entry of the ordered policy list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub config: Value,
}

impl PolicySpec {
    pub fn to_policy(&self) -> Policy {
        Policy::new(self.id.clone(), self.kind.clone()).with_config(self.config.clone())
    }
}

/// Log level per component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: component_name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `EnvFilter`-style directives, e.g. `"info,policychain_core=debug"`.
    pub fn directives(&self) -> String {
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        let mut directives = self.level.clone();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// A complete chain description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub policies: Vec<PolicySpec>,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_name() -> String {
    "default".to_string()
}

impl ChainConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load from `path`: `.yaml`/`.yml` as YAML, anything else as JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    /// The ordered policy descriptors.
    pub fn policies(&self) -> Vec<Policy> {
        self.policies.iter().map(PolicySpec::to_policy).collect()
    }

    /// Check the list is non-empty, ids are unique and every kind is known.
    pub fn validate(&self, registry: &HandlerRegistry) -> Result<(), ConfigError> {
        if self.policies.is_empty() {
            return Err(ComposeError::invalid("policies list cannot be empty").into());
        }
        let mut seen = HashSet::new();
        for spec in &self.policies {
            if !seen.insert(spec.id.as_str()) {
                return Err(ConfigError::DuplicatePolicy(spec.id.clone()));
            }
            if !registry.contains(&spec.kind) {
                return Err(ConfigError::UnknownKind {
                    policy: spec.id.clone(),
                    kind: spec.kind.clone(),
                });
            }
        }
        Ok(())
    }

    /// Instantiate every policy and compose the chain around `operation`.
    pub fn build(
        &self,
        registry: &HandlerRegistry,
        operation: Arc<dyn Operation>,
        factory: &ChainFactory,
    ) -> Result<PolicyChain, ConfigError> {
        self.validate(registry)?;
        let policies = self.policies();
        let invoker = RegistryInvoker::new(registry, &policies, operation)?;
        let chain = factory.create(policies, Arc::new(invoker))?;
        tracing::info!(chain = %self.name, policies = chain.len(), "policy chain built");
        Ok(chain)
    }
}
