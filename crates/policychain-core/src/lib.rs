//! policychain-core — compose ordered policies around a single operation.
//!
//! # Overview
//!
//! A chain wraps one terminal operation in an ordered list of independently
//! authored policies (security, throttling, logging, transformation, …) so
//! that each behaves like a nested decorator:
//!
//! ```text
//! request ─▶ p0 ─▶ p1 ─▶ … ─▶ p(n-1) ─▶ terminal
//! result  ◀─ p0 ◀─ p1 ◀─ … ◀─ p(n-1) ◀──────┘
//! ```
//!
//! The core crate defines:
//!
//! - [`compose`] — the right fold that builds the chain
//! - [`PolicyInvoker`] — the adapter that runs one policy or the terminal
//! - [`Continuation`] — "the rest of the chain" as a cloneable async callable
//! - [`DomainError`] / [`ComposeError`] — the normalized error contract
//! - [`ExecutionStateStore`] / [`StateScope`] — per-execution policy state
//!   that survives suspension and is released on every exit path
//! - [`PolicyChain`] / [`ChainFactory`] — built chains and their factory

pub mod chain;
pub mod composer;
pub mod continuation;
pub mod error;
pub mod factory;
pub mod invoker;
pub mod policy;
pub mod state;

pub use chain::PolicyChain;
pub use composer::compose;
pub use continuation::{ChainFuture, ChainResult, Continuation};
pub use error::{BoxError, ComposeError, DomainError, FailureOrigin};
pub use factory::ChainFactory;
pub use invoker::PolicyInvoker;
pub use policy::{ExecutionContext, ExecutionId, Policy, PolicyId};
pub use state::{ExecutionStateStore, InMemoryStateStore, ScopeId, StateKey, StateScope};
