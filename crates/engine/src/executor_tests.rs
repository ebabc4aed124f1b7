//! End-to-end tests for the workflow engine.
//!
//! Handlers are the registry built-ins plus `MockNode`; events go through
//! `InMemoryBridge`, so nothing here touches a network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nodes::mock::MockNode;
use nodes::{ExecutableNode, ExecutionContext, HandlerRegistry, NodeError};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;
use tokio::time::timeout;

use crate::bridge::{EventBridgeError, TransferEvent};
use crate::events::{ChannelNotifier, ExecutionEvent};
use crate::executor::{EngineConfig, WorkflowEngine};
use crate::memory_bridge::InMemoryBridge;
use crate::models::{Edge, NodeDefinition, NodeStatus, Workflow, WorkflowStatus};
use crate::EngineError;

// ============================================================
// Fixtures
// ============================================================

struct Harness {
    engine: WorkflowEngine,
    bridge: Arc<InMemoryBridge>,
    events: UnboundedReceiver<ExecutionEvent>,
}

fn harness(registry: HandlerRegistry) -> Harness {
    harness_with_bridge(registry, InMemoryBridge::new())
}

fn harness_with_bridge(registry: HandlerRegistry, bridge: InMemoryBridge) -> Harness {
    let (notifier, events) = ChannelNotifier::channel();
    let bridge = Arc::new(bridge);
    let engine = WorkflowEngine::new(Arc::new(registry), bridge.clone(), Arc::new(notifier));
    Harness { engine, bridge, events }
}

fn drain(events: &mut UnboundedReceiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn started(events: &[ExecutionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::NodeStart { node_id } => Some(node_id.clone()),
            _ => None,
        })
        .collect()
}

/// Wait for the next event-triggered walk to finish, one way or the other.
async fn walk_finished(events: &mut UnboundedReceiver<ExecutionEvent>) -> ExecutionEvent {
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(e @ ExecutionEvent::WalkComplete { .. }) | Some(e @ ExecutionEvent::WalkError { .. }) => {
                    return e
                }
                Some(_) => continue,
                None => panic!("notifier channel closed"),
            }
        }
    })
    .await
    .expect("event walk did not finish in time")
}

/// Action that parks until its gate is opened, then echoes its input.
struct GatedAction {
    gate: Arc<Notify>,
}

#[async_trait]
impl ExecutableNode for GatedAction {
    async fn execute(&self, input: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        self.gate.notified().await;
        Ok(input)
    }
}

async fn node_started(events: &mut UnboundedReceiver<ExecutionEvent>, id: &str) {
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(ExecutionEvent::NodeStart { node_id }) if node_id == id => return,
                Some(_) => continue,
                None => panic!("notifier channel closed"),
            }
        }
    })
    .await
    .expect("node never started")
}

fn watcher_workflow() -> Workflow {
    Workflow::new(
        "watcher",
        vec![
            NodeDefinition::new("w", "event-source", json!({ "subject": "0xABC" })),
            NodeDefinition::new("t", "transform", json!({ "transformation": "double" })).with_prev("w"),
            NodeDefinition::new("a", "action", Value::Null).with_prev("t"),
        ],
        vec![],
    )
}

// ============================================================
// Straight-line execution
// ============================================================

#[tokio::test]
async fn transform_then_action() {
    let mut h = harness(HandlerRegistry::builtin());
    let wf = Workflow::new(
        "double-then-act",
        vec![
            NodeDefinition::new("1", "transform", json!({ "transformation": "double", "input": 5 })),
            NodeDefinition::new("2", "action", Value::Null).with_prev("1"),
        ],
        vec![],
    );

    let result = h.engine.execute(wf).await.unwrap();

    assert_eq!(result.results["1"], json!(10));
    assert_eq!(result.results["2"], json!({ "success": true, "id": "2" }));
    assert_eq!(result.run.status(), WorkflowStatus::Completed);
    assert_eq!(result.run.node_status("2"), Some(NodeStatus::Completed));

    let events = drain(&mut h.events);
    assert!(matches!(events.first(), Some(ExecutionEvent::WorkflowStart { .. })));
    assert!(matches!(events.last(), Some(ExecutionEvent::WorkflowComplete { results, .. }) if results.len() == 2));
    assert_eq!(started(&events), vec!["1", "2"]);
}

#[tokio::test]
async fn root_falls_back_to_workflow_input() {
    let h = harness(HandlerRegistry::builtin());
    let wf = Workflow::new(
        "chain",
        vec![
            NodeDefinition::new("inc", "transform", json!({ "transformation": "increment" })),
            NodeDefinition::new("dbl", "transform", json!({ "transformation": "double" })).with_prev("inc"),
        ],
        vec![],
    )
    .with_input(json!(7));

    let result = h.engine.execute(wf).await.unwrap();
    assert_eq!(result.results["inc"], json!(8));
    assert_eq!(result.results["dbl"], json!(16));
}

#[tokio::test]
async fn diamond_runs_join_once_after_both_branches() {
    let mut h = harness(HandlerRegistry::builtin());
    let node = |id: &str| NodeDefinition::new(id, "transform", json!({ "transformation": "increment" }));
    let wf = Workflow::new(
        "diamond",
        vec![node("d"), node("c"), node("b"), node("a")],
        vec![Edge::new("a", "b"), Edge::new("a", "c"), Edge::new("b", "d"), Edge::new("c", "d")],
    )
    .with_input(json!(0))
    .with_entry("a");

    let result = h.engine.execute(wf).await.unwrap();

    let order = started(&drain(&mut h.events));
    assert_eq!(order.len(), 4);
    assert_eq!(order[0], "a");
    assert_eq!(order[3], "d");
    assert_eq!(result.results["d"], json!(3));
}

#[tokio::test]
async fn nodes_unreachable_from_entry_stay_pending() {
    let h = harness(HandlerRegistry::builtin());
    let wf = Workflow::new(
        "island",
        vec![
            NodeDefinition::new("1", "action", Value::Null),
            NodeDefinition::new("2", "action", Value::Null),
        ],
        vec![],
    );

    let result = h.engine.execute(wf).await.unwrap();
    assert!(result.results.contains_key("1"));
    assert_eq!(result.run.node_status("2"), Some(NodeStatus::Pending));
}

// ============================================================
// Conditions
// ============================================================

#[tokio::test]
async fn false_condition_halts_branch() {
    let h = harness(HandlerRegistry::builtin());
    let wf = Workflow::new(
        "gate",
        vec![
            NodeDefinition::new("1", "condition", json!({ "condition": false, "trueTarget": "2" })),
            NodeDefinition::new("2", "action", Value::Null),
        ],
        vec![],
    );

    let result = h.engine.execute(wf).await.unwrap();

    assert_eq!(result.results.len(), 1);
    assert_eq!(result.results["1"], json!(false));
    assert_eq!(result.run.node_status("2"), Some(NodeStatus::Pending));
    assert_eq!(result.run.status(), WorkflowStatus::Completed);
}

#[tokio::test]
async fn true_condition_follows_only_its_target() {
    let h = harness(HandlerRegistry::builtin());
    let wf = Workflow::new(
        "branch",
        vec![
            NodeDefinition::new(
                "1",
                "condition",
                json!({ "condition": { "operator": "gt", "value": 100 }, "target": "big", "input": 150 }),
            ),
            NodeDefinition::new("small", "action", Value::Null).with_prev("1"),
            NodeDefinition::new("big", "action", Value::Null),
        ],
        vec![],
    );

    let result = h.engine.execute(wf).await.unwrap();

    assert_eq!(result.results["1"], json!(true));
    assert_eq!(result.results["big"]["success"], json!(true));
    assert_eq!(result.run.node_status("small"), Some(NodeStatus::Pending));
}

#[tokio::test]
async fn true_condition_without_target_continues_downstream() {
    let h = harness(HandlerRegistry::builtin());
    let wf = Workflow::new(
        "pass",
        vec![
            NodeDefinition::new("1", "condition", json!({ "condition": "truthy", "input": "yes" })),
            NodeDefinition::new("2", "action", Value::Null).with_prev("1"),
        ],
        vec![],
    );

    let result = h.engine.execute(wf).await.unwrap();
    assert_eq!(result.results["2"], json!({ "success": true, "id": "2" }));
}

// ============================================================
// Loops
// ============================================================

#[tokio::test]
async fn loop_collects_one_result_per_iteration() {
    let h = harness(HandlerRegistry::builtin());
    let wf = Workflow::new(
        "repeat",
        vec![
            NodeDefinition::new("1", "loop", json!({ "target": "2", "iterations": 3 })),
            NodeDefinition::new("2", "action", Value::Null),
        ],
        vec![],
    );

    let result = h.engine.execute(wf).await.unwrap();

    let record = json!({ "success": true, "id": "2" });
    assert_eq!(result.results["1"], json!([record.clone(), record.clone(), record]));
    assert_eq!(result.run.status(), WorkflowStatus::Completed);
}

#[tokio::test]
async fn loop_body_ends_where_it_reenters_the_loop() {
    let echo = Arc::new(MockNode::echoing("echo"));
    let h = harness(HandlerRegistry::builtin().with_action("echo", echo.clone()));
    let wf = Workflow::new(
        "body",
        vec![
            NodeDefinition::new("0", "transform", json!({ "transformation": "double", "input": 5 })),
            NodeDefinition::new("1", "loop", json!({ "target": "2", "iterations": 2 })).with_prev("0"),
            NodeDefinition::new("2", "transform", json!({ "transformation": "increment" })),
            NodeDefinition::new("3", "action", json!({ "action": "echo" }))
                .with_prev("2")
                .with_next("1"),
        ],
        vec![],
    );

    let result = h.engine.execute(wf).await.unwrap();

    assert_eq!(
        result.results["1"],
        json!([
            { "success": true, "id": "3", "detail": { "input": 11, "iteration": 0 } },
            { "success": true, "id": "3", "detail": { "input": 11, "iteration": 1 } },
        ])
    );
    assert_eq!(echo.call_count(), 2);
}

#[tokio::test]
async fn loop_defaults_to_three_iterations() {
    let h = harness(HandlerRegistry::builtin());
    let wf = Workflow::new(
        "default",
        vec![
            NodeDefinition::new("1", "loop", json!({ "target": "2" })),
            NodeDefinition::new("2", "action", Value::Null),
        ],
        vec![],
    );

    let result = h.engine.execute(wf).await.unwrap();
    assert_eq!(result.results["1"].as_array().map(Vec::len), Some(3));
}

#[tokio::test]
async fn loop_count_is_capped() {
    let h = harness(HandlerRegistry::builtin());
    let engine = h.engine.with_config(EngineConfig { default_loop_iterations: 3, max_loop_iterations: 2 });
    let wf = Workflow::new(
        "capped",
        vec![
            NodeDefinition::new("1", "loop", json!({ "target": "2", "iterations": 50 })),
            NodeDefinition::new("2", "action", Value::Null),
        ],
        vec![],
    );

    let result = engine.execute(wf).await.unwrap();
    assert_eq!(result.results["1"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn loop_stops_when_condition_holds() {
    let h = harness(HandlerRegistry::builtin());
    let wf = Workflow::new(
        "until",
        vec![
            NodeDefinition::new(
                "1",
                "loop",
                json!({
                    "target": "2",
                    "iterations": 10,
                    "stopWhen": { "operator": "gt", "value": 5 },
                    "input": 4,
                }),
            ),
            NodeDefinition::new("2", "transform", json!({ "transformation": "double" })),
        ],
        vec![],
    );

    let result = h.engine.execute(wf).await.unwrap();
    assert_eq!(result.results["1"], json!([8]));
}

#[tokio::test]
async fn loop_continues_past_its_body() {
    let h = harness(HandlerRegistry::builtin());
    let wf = Workflow::new(
        "after",
        vec![
            NodeDefinition::new("1", "loop", json!({ "target": "2", "iterations": 2 })).with_next("3"),
            NodeDefinition::new("2", "action", Value::Null),
            NodeDefinition::new("3", "action", json!({ "action": "tally" })),
        ],
        vec![],
    );
    let tally = Arc::new(MockNode::echoing("tally"));
    let engine = WorkflowEngine::new(
        Arc::new(HandlerRegistry::builtin().with_action("tally", tally.clone())),
        h.bridge.clone(),
        Arc::new(crate::events::NoopNotifier),
    );

    engine.execute(wf).await.unwrap();

    let inputs = tally.inputs();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].as_array().map(Vec::len), Some(2));
}

// ============================================================
// Failures
// ============================================================

#[tokio::test]
async fn cycle_fails_before_any_node_runs() {
    let mut h = harness(HandlerRegistry::builtin());
    let wf = Workflow::new(
        "cyclic",
        vec![
            NodeDefinition::new("A", "action", Value::Null),
            NodeDefinition::new("B", "action", Value::Null),
        ],
        vec![Edge::new("A", "B"), Edge::new("B", "A")],
    );
    let run = h.engine.prepare(wf);

    let err = h.engine.run(&run).await.unwrap_err();

    assert!(matches!(err, EngineError::CycleDetected { .. }));
    assert_eq!(run.status(), WorkflowStatus::Failed);
    assert_eq!(run.node_status("A"), Some(NodeStatus::Pending));
    assert_eq!(run.node_status("B"), Some(NodeStatus::Pending));

    let events = drain(&mut h.events);
    assert!(started(&events).is_empty());
    assert!(matches!(events.last(), Some(ExecutionEvent::WorkflowError { .. })));
}

#[tokio::test]
async fn node_failure_aborts_the_walk() {
    let h = harness(HandlerRegistry::builtin());
    let wf = Workflow::new(
        "broken",
        vec![
            NodeDefinition::new("1", "transform", json!({ "transformation": "square", "input": 3 })),
            NodeDefinition::new("2", "action", Value::Null).with_prev("1"),
        ],
        vec![],
    );
    let run = h.engine.prepare(wf);

    let err = h.engine.run(&run).await.unwrap_err();

    assert_eq!(err.node_id(), Some("1"));
    assert!(!err.is_transient());
    assert_eq!(run.status(), WorkflowStatus::Failed);
    assert_eq!(run.node_status("1"), Some(NodeStatus::Failed));
    assert_eq!(run.node_status("2"), Some(NodeStatus::Pending));
}

#[tokio::test]
async fn transient_handler_failure_stays_transient() {
    let flaky = HandlerRegistry::builtin()
        .with_default_action(Arc::new(MockNode::failing_transient("send", "rate limited")));
    let h = harness(flaky);
    let wf = Workflow::new("flaky", vec![NodeDefinition::new("1", "notification", Value::Null)], vec![]);

    let err = h.engine.execute(wf).await.unwrap_err();

    assert!(err.is_transient());
    assert!(matches!(
        &err,
        EngineError::NodeExecution { node_id, source: NodeError::Transient(msg) }
            if node_id == "1" && msg == "rate limited"
    ));
}

#[tokio::test]
async fn loop_targeting_itself_is_rejected_before_running() {
    let h = harness(HandlerRegistry::builtin());
    let run = h.engine.prepare(Workflow::new(
        "self-loop",
        vec![NodeDefinition::new("1", "loop", json!({ "target": "1", "iterations": 2 }))],
        vec![],
    ));

    let err = timeout(Duration::from_secs(5), h.engine.run(&run))
        .await
        .expect("run should return")
        .unwrap_err();

    assert!(matches!(&err, EngineError::CycleDetected { node_id } if node_id == "1"));
    assert_eq!(run.node_status("1"), Some(NodeStatus::Pending));
}

#[tokio::test]
async fn loops_targeting_each_other_fail_instead_of_recursing() {
    let h = harness(HandlerRegistry::builtin());
    let run = h.engine.prepare(Workflow::new(
        "mutual",
        vec![
            NodeDefinition::new("a", "loop", json!({ "target": "b", "iterations": 2 })),
            NodeDefinition::new("b", "loop", json!({ "target": "a", "iterations": 2 })),
        ],
        vec![],
    ));

    let err = timeout(Duration::from_secs(5), h.engine.run(&run))
        .await
        .expect("run should return")
        .unwrap_err();

    assert!(matches!(
        &err,
        EngineError::NodeExecution { node_id, source: NodeError::InvalidConfig(_) } if node_id == "a"
    ));
    assert_eq!(run.status(), WorkflowStatus::Failed);
}

#[tokio::test]
async fn unknown_type_runs_as_action_and_is_flagged() {
    let mut h = harness(HandlerRegistry::builtin());
    let wf = Workflow::new("odd", vec![NodeDefinition::new("u", "teleport", Value::Null)], vec![]);

    let result = h.engine.execute(wf).await.unwrap();

    assert_eq!(result.results["u"], json!({ "success": true, "id": "u" }));
    assert_eq!(result.run.anomalies(), vec!["u".to_string()]);
    assert!(drain(&mut h.events).iter().any(|e| matches!(
        e,
        ExecutionEvent::NodeAnomaly { node_id, node_type } if node_id == "u" && node_type == "teleport"
    )));
}

#[tokio::test]
async fn running_workflow_cannot_be_started_again() {
    let h = harness(HandlerRegistry::builtin());
    let run = h.engine.prepare(Workflow::new(
        "busy",
        vec![NodeDefinition::new("1", "action", Value::Null)],
        vec![],
    ));
    run.begin().unwrap();

    let err = h.engine.run(&run).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyRunning(_)));
    assert_eq!(run.status(), WorkflowStatus::Running);
}

// ============================================================
// Event sources
// ============================================================

#[tokio::test]
async fn event_source_registers_a_watch_and_ends_the_path() {
    let h = harness(HandlerRegistry::builtin());

    let result = h.engine.execute(watcher_workflow()).await.unwrap();

    let descriptor = &result.results["w"];
    assert_eq!(descriptor["status"], json!("watching"));
    assert_eq!(descriptor["subject"], json!("0xABC"));
    assert_eq!(result.run.status(), WorkflowStatus::Completed);
    assert_eq!(result.run.node_status("t"), Some(NodeStatus::Pending));

    let watches = result.run.watches();
    assert_eq!(watches.len(), 1);
    assert_eq!(descriptor["watchId"], json!(watches[0].watch_id));
    assert_eq!(h.bridge.active_watches(), 1);
}

#[tokio::test]
async fn each_event_starts_its_own_walk() {
    let mut h = harness(HandlerRegistry::builtin());
    let result = h.engine.execute(watcher_workflow()).await.unwrap();
    drain(&mut h.events);

    assert_eq!(h.bridge.emit("0xabc", json!(21)), 1);
    assert!(matches!(walk_finished(&mut h.events).await, ExecutionEvent::WalkComplete { .. }));
    assert_eq!(result.run.node_output("t"), Some(json!(42)));
    assert_eq!(result.run.node_output("a"), Some(json!({ "success": true, "id": "a" })));

    h.bridge.emit("0xABC", json!(5));
    assert!(matches!(walk_finished(&mut h.events).await, ExecutionEvent::WalkComplete { .. }));
    assert_eq!(result.run.node_output("t"), Some(json!(10)));

    // The source keeps its registration descriptor; events don't overwrite it.
    assert_eq!(result.run.node_output("w").map(|v| v["status"].clone()), Some(json!("watching")));
}

#[tokio::test]
async fn unwatch_stops_future_walks() {
    let mut h = harness(HandlerRegistry::builtin());
    let result = h.engine.execute(watcher_workflow()).await.unwrap();
    let watch_id = result.run.watches()[0].watch_id.clone();

    assert!(h.engine.unwatch(&result.run, &watch_id));
    assert!(!h.engine.unwatch(&result.run, &watch_id));
    assert_eq!(h.bridge.active_watches(), 0);
    assert_eq!(h.bridge.emit("0xABC", json!(1)), 0);

    tokio::task::yield_now().await;
    assert!(!drain(&mut h.events).iter().any(|e| matches!(e, ExecutionEvent::WalkStart { .. })));
    assert_eq!(result.run.node_status("t"), Some(NodeStatus::Pending));
}

#[tokio::test]
async fn unwatch_all_releases_every_watch() {
    let h = harness(HandlerRegistry::builtin());
    let wf = Workflow::new(
        "two-wallets",
        vec![
            NodeDefinition::new("w1", "event-source", json!({ "subject": "0x1" })),
            NodeDefinition::new("w2", "wallet-erc20-transfers", json!({ "walletAddress": "0x2" })),
        ],
        vec![Edge::new("w1", "w2")],
    );

    let result = h.engine.execute(wf).await.unwrap();
    // w1 ends its path, so w2 only registers when reached on its own.
    assert_eq!(result.run.watches().len(), 1);
    assert_eq!(h.engine.unwatch_all(&result.run), 1);
    assert!(result.run.watches().is_empty());
    assert_eq!(h.bridge.active_watches(), 0);
}

#[tokio::test]
async fn failed_event_walk_leaves_workflow_status_alone() {
    let failing = HandlerRegistry::builtin().with_default_action(Arc::new(MockNode::failing("a", "rpc timeout")));
    let mut h = harness(failing);
    let result = h.engine.execute(watcher_workflow()).await.unwrap();

    h.bridge.emit("0xABC", json!(1));

    match walk_finished(&mut h.events).await {
        ExecutionEvent::WalkError { node_id, error, .. } => {
            assert_eq!(node_id, "w");
            assert!(error.contains("rpc timeout"));
        }
        other => panic!("expected a walk error, got {other:?}"),
    }
    assert_eq!(result.run.status(), WorkflowStatus::Completed);
    assert_eq!(result.run.node_status("t"), Some(NodeStatus::Completed));
    assert_eq!(result.run.node_status("a"), Some(NodeStatus::Failed));
}

#[tokio::test]
async fn failed_watch_registration_fails_the_workflow() {
    let h = harness_with_bridge(HandlerRegistry::builtin(), InMemoryBridge::failing("rpc down"));
    let run = h.engine.prepare(watcher_workflow());

    let err = h.engine.run(&run).await.unwrap_err();

    assert!(matches!(&err, EngineError::EventBridge { node_id, .. } if node_id == "w"));
    assert!(err.is_transient());
    assert_eq!(run.status(), WorkflowStatus::Failed);
    assert_eq!(run.node_status("w"), Some(NodeStatus::Failed));
    assert!(run.watches().is_empty());
}

#[tokio::test]
async fn rerun_resets_state_and_replaces_watches() {
    let h = harness(HandlerRegistry::builtin());
    let result = h.engine.execute(watcher_workflow()).await.unwrap();
    let first_watch = result.run.watches()[0].watch_id.clone();

    h.engine.run(&result.run).await.unwrap();

    assert_ne!(result.run.execution_id(), result.execution_id);
    let watches = result.run.watches();
    assert_eq!(watches.len(), 1);
    assert_ne!(watches[0].watch_id, first_watch);
    assert_eq!(h.bridge.active_watches(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_event_walks_keep_their_own_inputs() {
    const EVENTS: i64 = 50;
    let echo = Arc::new(MockNode::echoing("echo"));
    let mut h = harness(HandlerRegistry::builtin().with_default_action(echo.clone()));
    let result = h.engine.execute(watcher_workflow()).await.unwrap();

    for i in 0..EVENTS {
        assert_eq!(h.bridge.emit("0xABC", json!(i)), 1);
    }
    for _ in 0..EVENTS {
        assert!(matches!(walk_finished(&mut h.events).await, ExecutionEvent::WalkComplete { .. }));
    }

    // Every action saw the doubled payload of its own event, exactly once.
    let mut seen: Vec<i64> = echo.inputs().iter().filter_map(Value::as_i64).collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..EVENTS).map(|i| i * 2).collect::<Vec<_>>());
    assert_eq!(result.run.status(), WorkflowStatus::Completed);
}

#[tokio::test]
async fn token_transfer_reaches_the_watching_wallet_successor() {
    let echo = Arc::new(MockNode::echoing("echo"));
    let mut h = harness(HandlerRegistry::builtin().with_action("notify", echo.clone()));
    let wf = Workflow::new(
        "wallet",
        vec![
            NodeDefinition::new(
                "w",
                "wallet-erc20-transfers",
                json!({ "walletAddress": "0x8BD0e959E9a7273D465ac74d427Ecc8AAaCa55D8" }),
            ),
            NodeDefinition::new("n", "notification", json!({ "action": "notify" })).with_prev("w"),
        ],
        vec![],
    );
    let result = h.engine.execute(wf).await.unwrap();
    assert_eq!(result.results["w"]["status"], json!("watching"));

    let transfer = TransferEvent {
        from: "0x1111111111111111111111111111111111111111".into(),
        to: "0x8bd0e959e9a7273d465ac74d427ecc8aaaca55d8".into(),
        value: "1500000".into(),
        transaction_hash: "0xfeed".into(),
        block_number: 6_100_200,
        token_symbol: "USDC".into(),
        value_formatted: "1.5".into(),
        timestamp: 1_700_000_000_000,
    };
    assert_eq!(h.bridge.emit_transfer(&transfer), 1);
    assert!(matches!(walk_finished(&mut h.events).await, ExecutionEvent::WalkComplete { .. }));

    let inputs = echo.inputs();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0]["transactionHash"], json!("0xfeed"));
    assert_eq!(inputs[0]["blockNumber"], json!(6_100_200));
    assert_eq!(inputs[0]["valueFormatted"], json!("1.5"));
    assert_eq!(inputs[0], transfer.to_payload());
    assert_eq!(result.run.node_output("n").map(|v| v["detail"]["input"]["tokenSymbol"].clone()), Some(json!("USDC")));

    let unrelated = TransferEvent { to: "0x2222222222222222222222222222222222222222".into(), ..transfer };
    assert_eq!(h.bridge.emit_transfer(&unrelated), 0);
}

#[tokio::test]
async fn rerun_drops_writes_from_walks_of_the_previous_execution() {
    let gate = Arc::new(Notify::new());
    let gated = HandlerRegistry::builtin().with_default_action(Arc::new(GatedAction { gate: gate.clone() }));
    let mut h = harness(gated);
    let result = h.engine.execute(watcher_workflow()).await.unwrap();

    h.bridge.emit("0xABC", json!(4));
    node_started(&mut h.events, "a").await;
    assert_eq!(result.run.node_output("t"), Some(json!(8)));

    h.engine.run(&result.run).await.unwrap();
    gate.notify_one();
    assert!(matches!(walk_finished(&mut h.events).await, ExecutionEvent::WalkComplete { .. }));

    let results = result.run.results();
    assert_eq!(results.len(), 1);
    assert!(results.contains_key("w"));
    assert_eq!(result.run.node_status("t"), Some(NodeStatus::Pending));
    assert_eq!(result.run.node_status("a"), Some(NodeStatus::Pending));
}

#[test]
fn watch_outside_a_runtime_is_a_bridge_error() {
    let h = harness(HandlerRegistry::builtin());
    let run = h.engine.prepare(watcher_workflow());

    let err = futures::executor::block_on(h.engine.run(&run)).unwrap_err();

    assert!(matches!(
        &err,
        EngineError::EventBridge { node_id, source: EventBridgeError::Unavailable(_) } if node_id == "w"
    ));
    assert!(run.watches().is_empty());
    assert_eq!(h.bridge.active_watches(), 0);
}
