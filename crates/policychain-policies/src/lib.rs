//! policychain-policies — built-in policies and configuration for PolicyChain.
//!
//! - [`HandlerRegistry`] maps a policy kind to a [`PolicyHandler`] builder
//! - [`RegistryInvoker`] is the concrete `PolicyInvoker` that dispatches to
//!   those handlers and runs an [`Operation`] as the terminal
//! - [`builtin`] — rate limit, circuit breaker, retry, logging, transform
//! - [`ChainConfig`] — YAML/JSON chain files

pub mod builtin;
pub mod config;
pub mod error;
pub mod handler;
pub mod invoker;
pub mod operation;

pub use config::{ChainConfig, LogConfig, PolicySpec};
pub use error::{is_retryable, ConfigError, PolicyRejection};
pub use handler::{parse_config, HandlerRegistry, PolicyHandler};
pub use invoker::RegistryInvoker;
pub use operation::{EchoOperation, FnOperation, Operation};
