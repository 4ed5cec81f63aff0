//! Execution state store — per-execution policy variables that must survive
//! an asynchronous suspension at a chain boundary.
//!
//! Records are keyed by `(execution id, StateKey)`, where the key carries the
//! id of the [`StateScope`] that wrote it. Two layers never share a record,
//! even when chains sharing a store are nested under the same execution id
//! with the same policy at the same position. Policies never touch the
//! store directly; each hop gets a [`StateScope`] that remembers what it wrote
//! and removes it on drop, so records are released on success, failure and
//! cancellation alike.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::{ExecutionId, PolicyId};

/// Process-unique id of one entered policy layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(u64);

impl ScopeId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// Identifies one variable of one policy layer within an execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    pub scope: ScopeId,
    pub position: usize,
    pub policy: PolicyId,
    pub slot: String,
}

impl StateKey {
    pub fn new(
        scope: ScopeId,
        position: usize,
        policy: PolicyId,
        slot: impl Into<String>,
    ) -> Self {
        Self {
            scope,
            position,
            policy,
            slot: slot.into(),
        }
    }
}

/// Shared keyed store for execution-scoped policy state.
///
/// Implementations must be linearizable per `(execution_id, key)` and must
/// keep different execution ids fully isolated. Calls are synchronous so a
/// scope can release its records from `Drop`.
pub trait ExecutionStateStore: Send + Sync + 'static {
    /// Store `value`, returning the previous value for the key if any.
    fn put(&self, execution_id: ExecutionId, key: StateKey, value: Value) -> Option<Value>;

    fn get(&self, execution_id: &ExecutionId, key: &StateKey) -> Option<Value>;

    fn remove(&self, execution_id: &ExecutionId, key: &StateKey) -> Option<Value>;

    /// Number of live records held for `execution_id`.
    fn records_for(&self, execution_id: &ExecutionId) -> usize;
}

/// Process-wide in-memory store.
#[derive(Default)]
pub struct InMemoryStateStore {
    records: Mutex<HashMap<ExecutionId, HashMap<StateKey, Value>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total live records across every execution.
    pub fn total_records(&self) -> usize {
        self.records.lock().unwrap().values().map(HashMap::len).sum()
    }

    /// Number of executions that currently hold at least one record.
    pub fn execution_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }

    /// Snapshot of every live record held for `execution_id`, in key order.
    pub fn records(&self, execution_id: &ExecutionId) -> Vec<(StateKey, Value)> {
        let mut records: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .get(execution_id)
            .map(|slots| slots.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records
    }
}

impl ExecutionStateStore for InMemoryStateStore {
    fn put(&self, execution_id: ExecutionId, key: StateKey, value: Value) -> Option<Value> {
        self.records
            .lock()
            .unwrap()
            .entry(execution_id)
            .or_default()
            .insert(key, value)
    }

    fn get(&self, execution_id: &ExecutionId, key: &StateKey) -> Option<Value> {
        self.records
            .lock()
            .unwrap()
            .get(execution_id)
            .and_then(|slots| slots.get(key))
            .cloned()
    }

    fn remove(&self, execution_id: &ExecutionId, key: &StateKey) -> Option<Value> {
        let mut records = self.records.lock().unwrap();
        let slots = records.get_mut(execution_id)?;
        let removed = slots.remove(key);
        if slots.is_empty() {
            records.remove(execution_id);
        }
        removed
    }

    fn records_for(&self, execution_id: &ExecutionId) -> usize {
        self.records
            .lock()
            .unwrap()
            .get(execution_id)
            .map_or(0, HashMap::len)
    }
}

impl std::fmt::Debug for InMemoryStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStateStore")
            .field("executions", &self.execution_count())
            .field("records", &self.total_records())
            .finish()
    }
}

/// State handle for one policy layer of one execution.
///
/// Created by the composer when a policy is entered and dropped when that
/// layer is exited, however it is exited. Every slot written through the
/// scope is removed from the store on drop.
pub struct StateScope {
    store: Arc<dyn ExecutionStateStore>,
    id: ScopeId,
    execution_id: ExecutionId,
    policy: PolicyId,
    position: usize,
    written: Mutex<BTreeSet<String>>,
}

impl StateScope {
    pub fn new(
        store: Arc<dyn ExecutionStateStore>,
        execution_id: ExecutionId,
        policy: PolicyId,
        position: usize,
    ) -> Self {
        Self {
            store,
            id: ScopeId::next(),
            execution_id,
            policy,
            position,
            written: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn policy_id(&self) -> &PolicyId {
        &self.policy
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Store key of `slot` for this layer.
    pub fn key(&self, slot: &str) -> StateKey {
        StateKey::new(self.id, self.position, self.policy.clone(), slot)
    }

    pub fn put(&self, slot: &str, value: Value) -> Option<Value> {
        self.written.lock().unwrap().insert(slot.to_string());
        self.store.put(self.execution_id, self.key(slot), value)
    }

    pub fn get(&self, slot: &str) -> Option<Value> {
        self.store.get(&self.execution_id, &self.key(slot))
    }

    pub fn remove(&self, slot: &str) -> Option<Value> {
        self.written.lock().unwrap().remove(slot);
        self.store.remove(&self.execution_id, &self.key(slot))
    }

    /// Serialize `value` into `slot`.
    pub fn put_as<T: Serialize>(&self, slot: &str, value: &T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.put(slot, value);
        Ok(())
    }

    /// Read and deserialize `slot`, `Ok(None)` if absent.
    pub fn get_as<T: DeserializeOwned>(&self, slot: &str) -> Result<Option<T>, serde_json::Error> {
        self.get(slot).map(serde_json::from_value::<T>).transpose()
    }
}

impl Drop for StateScope {
    fn drop(&mut self) {
        let written = std::mem::take(self.written.get_mut().unwrap_or_else(|e| e.into_inner()));
        for slot in written {
            self.store.remove(&self.execution_id, &self.key(&slot));
        }
        tracing::trace!(
            scope = %self.id,
            execution_id = %self.execution_id,
            policy = %self.policy,
            position = self.position,
            "released policy state"
        );
    }
}

impl std::fmt::Debug for StateScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateScope")
            .field("id", &self.id)
            .field("execution_id", &self.execution_id)
            .field("policy", &self.policy)
            .field("position", &self.position)
            .finish()
    }
}
