//! End-to-end properties of composed chains: ordering, failure
//! normalization, state cleanup, isolation and cancellation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{oneshot, Barrier};

use policychain_core::{
    BoxError, ChainFactory, ComposeError, Continuation, DomainError, ExecutionContext,
    ExecutionStateStore, FailureOrigin, InMemoryStateStore, Policy, PolicyChain, PolicyInvoker,
    StateScope,
};

// ─── Helpers ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("backend unavailable (token {0})")]
struct BackendDown(u32);

enum Terminal {
    Echo,
    Fail(u32),
    /// Check in at `arrived`, then stay parked until `release` opens.
    Rendezvous {
        arrived: Arc<Barrier>,
        release: Arc<Barrier>,
    },
    /// Run another chain with the same execution id and a new payload.
    Nested(PolicyChain),
    /// Report entry, then never complete.
    Hang(Mutex<Option<oneshot::Sender<()>>>),
}

/// Policies are scripted by kind:
/// - `record`  — store the payload as a marker, log entry/exit, delegate,
///   then check the marker still holds that payload
/// - `fail`    — store a marker and fail without delegating
/// - `recover` — delegate and replace any failure with a fallback payload
/// - `tag`     — add the policy id to the payload on the way in and out
struct Scripted {
    log: Arc<Mutex<Vec<String>>>,
    terminal: Terminal,
}

impl Scripted {
    fn new(terminal: Terminal) -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                log: log.clone(),
                terminal,
            }),
            log,
        )
    }

    fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl PolicyInvoker for Scripted {
    async fn apply_policy(
        &self,
        policy: &Policy,
        next: Continuation,
        ctx: ExecutionContext,
        state: &StateScope,
    ) -> Result<ExecutionContext, BoxError> {
        let id = policy.id().to_string();
        match policy.kind() {
            "record" => {
                let original = ctx.payload.clone();
                state.put("marker", original.clone());
                self.push(format!(">{id}"));
                let out = next.call(ctx).await?;
                let marker = state.get("marker");
                self.push(format!("<{id}"));
                assert_eq!(marker, Some(original), "state of {id} changed across suspension");
                Ok(out)
            }
            "fail" => {
                state.put("marker", json!(true));
                self.push(format!("!{id}"));
                Err(Box::new(BackendDown(99)))
            }
            "recover" => {
                self.push(format!(">{id}"));
                match next.call(ctx.clone()).await {
                    Ok(out) => Ok(out),
                    Err(_) => Ok(ctx.map_payload(|_| json!("fallback"))),
                }
            }
            "tag" => {
                let ctx = ctx.map_payload(|mut v| {
                    v["in"].as_array_mut().unwrap().push(json!(id.clone()));
                    v
                });
                let out = next.call(ctx).await?;
                Ok(out.map_payload(|mut v| {
                    v["out"].as_array_mut().unwrap().push(json!(id.clone()));
                    v
                }))
            }
            other => Err(format!("unknown kind {other}").into()),
        }
    }

    async fn apply_terminal(&self, ctx: ExecutionContext) -> Result<ExecutionContext, BoxError> {
        self.push("terminal".into());
        match &self.terminal {
            Terminal::Echo => Ok(ctx),
            Terminal::Fail(token) => Err(Box::new(BackendDown(*token))),
            Terminal::Rendezvous { arrived, release } => {
                arrived.wait().await;
                release.wait().await;
                Ok(ctx)
            }
            Terminal::Nested(inner) => {
                let out = inner.execute(ctx.map_payload(|_| json!("inner"))).await?;
                Ok(out)
            }
            Terminal::Hang(entered) => {
                if let Some(tx) = entered.lock().unwrap().take() {
                    let _ = tx.send(());
                }
                futures::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

fn policies(kinds: &[&str]) -> Vec<Policy> {
    kinds
        .iter()
        .enumerate()
        .map(|(i, kind)| Policy::new(format!("p{i}"), *kind))
        .collect()
}

fn build(
    kinds: &[&str],
    invoker: Arc<Scripted>,
) -> (PolicyChain, Arc<InMemoryStateStore>) {
    let store = Arc::new(InMemoryStateStore::new());
    let factory = ChainFactory::new(store.clone());
    let chain = factory.create(policies(kinds), invoker).unwrap();
    (chain, store)
}

// ─── Ordering ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pre_logic_in_order_post_logic_reversed() {
    for n in 1..=6 {
        let (invoker, log) = Scripted::new(Terminal::Echo);
        let (chain, store) = build(&vec!["record"; n], invoker);

        chain.execute(ExecutionContext::new(json!(n))).await.unwrap();

        let mut expected: Vec<String> = (0..n).map(|i| format!(">p{i}")).collect();
        expected.push("terminal".into());
        expected.extend((0..n).rev().map(|i| format!("<p{i}")));
        assert_eq!(*log.lock().unwrap(), expected, "n = {n}");
        assert!(store.is_empty());
    }
}

#[tokio::test]
async fn transformations_nest() {
    let (invoker, _) = Scripted::new(Terminal::Echo);
    let (chain, _) = build(&["tag", "tag", "tag"], invoker);

    let out = chain
        .execute(ExecutionContext::new(json!({ "in": [], "out": [] })))
        .await
        .unwrap();
    assert_eq!(out.payload["in"], json!(["p0", "p1", "p2"]));
    assert_eq!(out.payload["out"], json!(["p2", "p1", "p0"]));
}

#[test]
fn empty_chain_is_invalid_configuration() {
    let (invoker, _) = Scripted::new(Terminal::Echo);
    let err = ChainFactory::default()
        .create(vec![], invoker)
        .unwrap_err();
    assert!(matches!(err, ComposeError::InvalidConfiguration { .. }));
}

// ─── Failure normalization ────────────────────────────────────────────────────

#[tokio::test]
async fn terminal_failure_wrapped_exactly_once() {
    let (invoker, _) = Scripted::new(Terminal::Fail(7));
    let (chain, store) = build(&["record", "record", "record"], invoker);

    let err = chain.execute(ExecutionContext::new(json!(null))).await.unwrap_err();

    assert_eq!(err.origin(), &FailureOrigin::Terminal);
    assert!(err.is_wrapped());
    assert!(!err.cause_is::<DomainError>(), "outer layer re-wrapped the failure");
    assert_eq!(err.downcast_cause_ref::<BackendDown>().map(|e| e.0), Some(7));
    assert!(store.is_empty());
}

#[tokio::test]
async fn policy_failure_stops_the_chain() {
    let (invoker, log) = Scripted::new(Terminal::Echo);
    let (chain, store) = build(&["record", "record", "fail", "record"], invoker);

    let ctx = ExecutionContext::new(json!("req"));
    let id = ctx.id;
    let err = chain.execute(ctx).await.unwrap_err();

    assert_eq!(*log.lock().unwrap(), vec![">p0", ">p1", "!p2"]);
    assert_eq!(
        err.origin(),
        &FailureOrigin::Policy {
            id: "p2".into(),
            position: 2
        }
    );
    assert!(err.cause_is::<BackendDown>());
    assert_eq!(store.records_for(&id), 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn recovering_policy_swallows_failure() {
    let (invoker, log) = Scripted::new(Terminal::Fail(1));
    let (chain, store) = build(&["record", "recover", "record"], invoker);

    let out = chain.execute(ExecutionContext::new(json!("req"))).await.unwrap();

    assert_eq!(out.payload, json!("fallback"));
    assert_eq!(*log.lock().unwrap(), vec![">p0", ">p1", ">p2", "terminal", "<p0"]);
    assert!(store.is_empty());
}

// ─── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_executions_are_isolated() {
    let arrived = Arc::new(Barrier::new(3));
    let release = Arc::new(Barrier::new(3));
    let (invoker, _) = Scripted::new(Terminal::Rendezvous {
        arrived: arrived.clone(),
        release: release.clone(),
    });
    let (chain, store) = build(&["record", "record"], invoker);

    let a = ExecutionContext::new(json!("a"));
    let b = ExecutionContext::new(json!("b"));
    let (ida, idb) = (a.id, b.id);

    let (ca, cb) = (chain.clone(), chain.clone());
    let ta = tokio::spawn(async move { ca.execute(a).await });
    let tb = tokio::spawn(async move { cb.execute(b).await });

    // Both executions are suspended inside the terminal with every layer live.
    arrived.wait().await;
    for (id, expected) in [(ida, json!("a")), (idb, json!("b"))] {
        let records = store.records(&id);
        assert_eq!(records.len(), 2);
        for (key, value) in &records {
            assert_eq!(key.slot, "marker");
            assert_eq!(value, &expected, "{id} sees a foreign record at {}", key.policy);
        }
    }
    release.wait().await;

    let ra = ta.await.unwrap().unwrap();
    let rb = tb.await.unwrap().unwrap();

    assert_eq!((ra.id, ra.payload), (ida, json!("a")));
    assert_eq!((rb.id, rb.payload), (idb, json!("b")));
    assert!(store.is_empty());
}

/// Both executions are parked at the terminal with their records live;
/// each must only see its own markers.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn records_visible_only_to_owner_while_suspended() {
    let (tx, rx) = oneshot::channel();
    let (invoker, _) = Scripted::new(Terminal::Hang(Mutex::new(Some(tx))));
    let (chain, store) = build(&["record", "record"], invoker);

    let ctx = ExecutionContext::new(json!("owner"));
    let id = ctx.id;
    let c = chain.clone();
    let handle = tokio::spawn(async move { c.execute(ctx).await });
    rx.await.unwrap();

    assert_eq!(store.records_for(&id), 2);
    let stranger = policychain_core::ExecutionId::new();
    assert_eq!(store.records_for(&stranger), 0);
    let records = store.records(&id);
    assert_eq!(
        records.iter().map(|(key, _)| key.policy.as_str()).collect::<Vec<_>>(),
        vec!["p0", "p1"]
    );
    assert!(records.iter().all(|(_, value)| value == &json!("owner")));
    let (key, _) = &records[0];
    assert_eq!(store.get(&id, key), Some(json!("owner")));
    assert!(store.get(&stranger, key).is_none());

    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());
    assert!(store.is_empty());
}

#[tokio::test]
async fn nested_chains_sharing_a_store_keep_their_own_records() {
    let store = Arc::new(InMemoryStateStore::new());
    let factory = ChainFactory::new(store.clone());
    let (inner_invoker, inner_log) = Scripted::new(Terminal::Echo);
    let inner = factory.create(policies(&["record"]), inner_invoker).unwrap();
    let (outer_invoker, outer_log) = Scripted::new(Terminal::Nested(inner));
    let outer = factory.create(policies(&["record"]), outer_invoker).unwrap();

    let out = outer
        .execute(ExecutionContext::new(json!("outer")))
        .await
        .unwrap();

    assert_eq!(out.payload, json!("inner"));
    assert_eq!(*inner_log.lock().unwrap(), vec![">p0", "terminal", "<p0"]);
    assert_eq!(*outer_log.lock().unwrap(), vec![">p0", "terminal", "<p0"]);
    assert!(store.is_empty());
}

// ─── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_execution_leaves_no_records() {
    let (tx, rx) = oneshot::channel();
    let (invoker, log) = Scripted::new(Terminal::Hang(Mutex::new(Some(tx))));
    let (chain, store) = build(&["record", "record", "record"], invoker);

    let ctx = ExecutionContext::new(json!("doomed"));
    let id = ctx.id;
    let handle = tokio::spawn(async move { chain.execute(ctx).await });

    rx.await.unwrap();
    assert_eq!(store.records_for(&id), 3);

    handle.abort();
    let _ = handle.await;

    assert_eq!(store.records_for(&id), 0);
    // No layer ran its post-logic.
    assert_eq!(*log.lock().unwrap(), vec![">p0", ">p1", ">p2", "terminal"]);
}

#[tokio::test]
async fn timeout_cancels_and_reports_domain_error() {
    let (tx, _rx) = oneshot::channel();
    let (invoker, _) = Scripted::new(Terminal::Hang(Mutex::new(Some(tx))));
    let (chain, store) = build(&["record", "record"], invoker);

    let err = chain
        .execute_with_timeout(ExecutionContext::new(json!(1)), Duration::from_millis(20))
        .await
        .unwrap_err();

    assert!(err.cause_is::<tokio::time::error::Elapsed>());
    assert!(err.message().contains("timed out"));
    assert!(store.is_empty());
}
