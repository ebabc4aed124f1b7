//! Workflow execution engine.
//!
//! `WorkflowEngine` is the central orchestrator:
//! 1. Validates the graph and produces an execution order.
//! 2. Walks nodes from the entry, one at a time, resolving each node's input
//!    from its predecessor's recorded output.
//! 3. Dispatches each node by type; conditions pick the branch, loops re-walk
//!    their body, event sources register a watch and end the path.
//! 4. Records per-node status and output and emits lifecycle events.
//!
//! A walk visits pending nodes in execution-order position, so a node never
//! runs before a predecessor that is also on the walk.  Sibling branches run
//! sequentially.  Event deliveries each spawn an independent walk on the
//! runtime that registered the watch.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use nodes::{ExecutionContext, HandlerRegistry, NodeError};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::bridge::{EventBridge, EventBridgeError, EventCallback};
use crate::dag::Graph;
use crate::dispatcher::NodeDispatcher;
use crate::events::{ExecutionEvent, ExecutionNotifier};
use crate::models::{NodeDefinition, NodeStatus, NodeType, Workflow, WorkflowStatus};
use crate::node_config::{self, LoopConfig, WatchConfig};
use crate::run::{ResultStore, WorkflowRun};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Iterations for loop nodes that don't configure a count.
    pub default_loop_iterations: u32,
    /// Hard ceiling on any loop's iteration count.
    pub max_loop_iterations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_loop_iterations: 3,
            max_loop_iterations: 1_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Output of a completed execution
// ---------------------------------------------------------------------------

/// The result of running a workflow's initial walk.
#[derive(Debug)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    /// Node id → output for every node the initial walk ran.
    pub results: ResultStore,
    /// Live handle; event-triggered walks keep writing through it.
    pub run: WorkflowRun,
}

// ---------------------------------------------------------------------------
// Walk bookkeeping
// ---------------------------------------------------------------------------

/// One traversal of (part of) the graph.
struct Walk {
    run: WorkflowRun,
    graph: Arc<Graph>,
    id: Uuid,
    /// Execution this walk writes into.
    execution: Uuid,
    /// Outputs produced on this walk.  Inputs resolve here before falling
    /// back to the run's shared store, so concurrent walks don't read each
    /// other's intermediate values.
    outputs: HashMap<String, Value>,
    iteration: Option<usize>,
    /// Loops whose body this walk is running, outermost first.
    active_loops: Vec<String>,
}

impl Walk {
    fn new(run: WorkflowRun, graph: Arc<Graph>, id: Uuid, execution: Uuid) -> Self {
        Self {
            run,
            graph,
            id,
            execution,
            outputs: HashMap::new(),
            iteration: None,
            active_loops: Vec::new(),
        }
    }

    /// A scope for one iteration of `loop_id`: same run and walk id, a copy
    /// of the outputs seen so far.
    fn iteration(&self, loop_id: &str, iteration: usize) -> Self {
        let mut active_loops = self.active_loops.clone();
        active_loops.push(loop_id.to_owned());
        Self {
            run: self.run.clone(),
            graph: Arc::clone(&self.graph),
            id: self.id,
            execution: self.execution,
            outputs: self.outputs.clone(),
            iteration: Some(iteration),
            active_loops,
        }
    }
}

/// What a node produced and where the walk goes next.
struct Step {
    output: Value,
    next: Vec<String>,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Orchestrates workflow runs.
///
/// Cheap to clone: every collaborator sits behind an `Arc`, which is what
/// lets event callbacks own a handle to the engine.
#[derive(Clone)]
pub struct WorkflowEngine {
    dispatcher: NodeDispatcher,
    bridge: Arc<dyn EventBridge>,
    notifier: Arc<dyn ExecutionNotifier>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        bridge: Arc<dyn EventBridge>,
        notifier: Arc<dyn ExecutionNotifier>,
    ) -> Self {
        Self {
            dispatcher: NodeDispatcher::new(registry),
            bridge,
            notifier,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Wrap `workflow` in a fresh, pending run.
    pub fn prepare(&self, workflow: Workflow) -> WorkflowRun {
        WorkflowRun::new(workflow)
    }

    /// Prepare and run `workflow` in one go.
    ///
    /// # Errors
    /// See [`WorkflowEngine::run`].
    pub async fn execute(&self, workflow: Workflow) -> Result<ExecutionResult, EngineError> {
        let run = self.prepare(workflow);
        let results = self.run(&run).await?;
        Ok(ExecutionResult { execution_id: run.execution_id(), results, run })
    }

    /// Run the initial walk of `run` and return the result store.
    ///
    /// For workflows rooted at an event source, success means the watch is
    /// registered; downstream work happens later, per event.
    ///
    /// # Errors
    /// - [`EngineError::AlreadyRunning`] if `run` is mid-execution.
    /// - Validation errors (including [`EngineError::CycleDetected`]) before
    ///   any node runs.
    /// - The first node failure, which aborts the walk.
    #[instrument(skip_all, fields(workflow_id = %run.workflow().id))]
    pub async fn run(&self, run: &WorkflowRun) -> Result<ResultStore, EngineError> {
        let stale = run.begin()?;
        for handle in &stale {
            self.bridge.unwatch(handle);
        }

        let workflow_id = run.workflow().id;
        self.notifier.notify(ExecutionEvent::WorkflowStart { workflow_id });

        match self.initial_walk(run).await {
            Ok(()) => {
                run.finish(WorkflowStatus::Completed);
                let results = run.results();
                info!("workflow '{}' execution {} completed", workflow_id, run.execution_id());
                self.notifier.notify(ExecutionEvent::WorkflowComplete {
                    workflow_id,
                    results: results.clone(),
                });
                Ok(results)
            }
            Err(err) => {
                run.finish(WorkflowStatus::Failed);
                error!("workflow '{}' failed: {}", workflow_id, err);
                self.notifier.notify(ExecutionEvent::WorkflowError {
                    workflow_id,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Stop one watch.  Walks already in flight are unaffected.  Returns
    /// `false` if the watch was unknown or already stopped.
    pub fn unwatch(&self, run: &WorkflowRun, watch_id: &str) -> bool {
        match run.remove_watch(watch_id) {
            Some(handle) => {
                if let Some(handle) = handle {
                    self.bridge.unwatch(&handle);
                }
                info!(watch_id, "watch stopped");
                true
            }
            None => false,
        }
    }

    /// Stop every watch of `run`; returns how many were active.
    pub fn unwatch_all(&self, run: &WorkflowRun) -> usize {
        run.watch_ids()
            .iter()
            .filter(|id| self.unwatch(run, id))
            .count()
    }

    // -----------------------------------------------------------------------
    // Walking
    // -----------------------------------------------------------------------

    async fn initial_walk(&self, run: &WorkflowRun) -> Result<(), EngineError> {
        let graph = Arc::new(Graph::build(run.workflow())?);
        info!(
            "graph validated: {} nodes in order {:?}",
            graph.order().len(),
            graph.order()
        );

        let entry = match &run.workflow().entry {
            Some(entry) => entry.clone(),
            None => graph.order().first().cloned().ok_or(EngineError::EmptyWorkflow)?,
        };
        debug!(entry = %entry, "starting initial walk");

        let mut walk = Walk::new(run.clone(), graph, Uuid::new_v4(), run.execution_id());
        self.walk(&mut walk, vec![entry], None, None).await.map(|_| ())
    }

    /// Run every node reachable from `entries`, lowest execution-order
    /// position first.  `entry_input` overrides input resolution for the
    /// entries themselves.  Successors equal to `stop_at` are not followed.
    ///
    /// Returns the output of the last node run.
    fn walk<'a>(
        &'a self,
        walk: &'a mut Walk,
        entries: Vec<String>,
        entry_input: Option<Value>,
        stop_at: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<Value>, EngineError>> {
        async move {
            let workflow = walk.run.workflow_arc();
            let overridden: HashSet<String> = match entry_input {
                Some(_) => entries.iter().cloned().collect(),
                None => HashSet::new(),
            };

            let mut frontier: BTreeSet<(usize, String)> = BTreeSet::new();
            for id in entries {
                frontier.insert((walk.graph.position(&id).unwrap_or(usize::MAX), id));
            }

            let mut visited: HashSet<String> = HashSet::new();
            let mut last = None;

            while let Some((_, node_id)) = frontier.pop_first() {
                if !visited.insert(node_id.clone()) {
                    continue;
                }
                let Some(node) = workflow.node(&node_id) else {
                    warn!(node_id = %node_id, "walk reached a node that is not in the workflow");
                    continue;
                };

                let input = match (&entry_input, overridden.contains(&node_id)) {
                    (Some(value), true) => value.clone(),
                    _ => self.resolve_input(walk, node),
                };

                let step = self.execute_node(walk, node, input).await?;
                last = Some(step.output);

                for next in step.next {
                    if stop_at == Some(next.as_str()) || visited.contains(&next) {
                        continue;
                    }
                    let position = walk.graph.position(&next).unwrap_or(usize::MAX);
                    frontier.insert((position, next));
                }
            }

            Ok(last)
        }
        .boxed()
    }

    /// A root reads its configured input (or the workflow's); anything else
    /// reads its predecessor's latest output.
    fn resolve_input(&self, walk: &Walk, node: &NodeDefinition) -> Value {
        let predecessor = node
            .prev
            .as_deref()
            .or_else(|| walk.graph.upstream(&node.id).first().map(String::as_str));

        match predecessor {
            None => node_config::configured_input(node)
                .cloned()
                .unwrap_or_else(|| walk.run.workflow().input.clone()),
            Some(pred) => walk
                .outputs
                .get(pred)
                .cloned()
                .or_else(|| walk.run.output_in(walk.execution, pred))
                .unwrap_or(Value::Null),
        }
    }

    async fn execute_node(
        &self,
        walk: &mut Walk,
        node: &NodeDefinition,
        input: Value,
    ) -> Result<Step, EngineError> {
        walk.run.mark_node(walk.execution, &node.id, NodeStatus::Running);
        self.notifier.notify(ExecutionEvent::NodeStart { node_id: node.id.clone() });
        debug!(node_id = %node.id, node_type = %node.node_type, walk_id = %walk.id, "node started");

        match self.node_logic(walk, node, input).await {
            Ok(step) => {
                walk.run.record_output(walk.execution, &node.id, step.output.clone());
                walk.outputs.insert(node.id.clone(), step.output.clone());
                self.notifier.notify(ExecutionEvent::NodeComplete {
                    node_id: node.id.clone(),
                    result: step.output.clone(),
                });
                info!("node '{}' completed", node.id);
                Ok(step)
            }
            Err(err) => {
                walk.run.mark_node(walk.execution, &node.id, NodeStatus::Failed);
                error!("node '{}' failed: {}", node.id, err);
                self.notifier.notify(ExecutionEvent::NodeError {
                    node_id: node.id.clone(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn node_logic(
        &self,
        walk: &mut Walk,
        node: &NodeDefinition,
        input: Value,
    ) -> Result<Step, EngineError> {
        let failed = |source: NodeError| EngineError::NodeExecution {
            node_id: node.id.clone(),
            source,
        };

        match &node.node_type {
            NodeType::Loop => self.run_loop(walk, node, input).await,
            NodeType::EventSource => self.register_watch(walk, node).await,
            NodeType::Condition => {
                let decision = self.dispatcher.condition(node, &input).map_err(failed)?;
                let next = match (decision.holds, decision.target) {
                    (true, Some(target)) => vec![target],
                    (true, None) => walk.graph.downstream(&node.id).to_vec(),
                    (false, _) => {
                        info!("condition '{}' is false; branch ends here", node.id);
                        Vec::new()
                    }
                };
                Ok(Step { output: Value::Bool(decision.holds), next })
            }
            other => {
                if let NodeType::Unknown(type_name) = other {
                    warn!(
                        "node '{}' has unknown type '{}'; running it as a generic action",
                        node.id, type_name
                    );
                    walk.run.record_anomaly(walk.execution, &node.id);
                    self.notifier.notify(ExecutionEvent::NodeAnomaly {
                        node_id: node.id.clone(),
                        node_type: type_name.clone(),
                    });
                }

                let ctx = self.context(walk, node);
                let output = self.dispatcher.dispatch(node, input, &ctx).await.map_err(failed)?;
                Ok(Step { output, next: walk.graph.downstream(&node.id).to_vec() })
            }
        }
    }

    fn context(&self, walk: &Walk, node: &NodeDefinition) -> ExecutionContext {
        ExecutionContext {
            workflow_id: walk.run.workflow().id,
            execution_id: walk.execution,
            walk_id: walk.id,
            node_id: node.id.clone(),
            node_type: node.node_type.to_string(),
            config: node.config.clone(),
            iteration: walk.iteration,
        }
    }

    // -----------------------------------------------------------------------
    // Loops
    // -----------------------------------------------------------------------

    /// Walk the body rooted at the loop's target once per iteration and
    /// collect each iteration's final output.  The body ends where it would
    /// re-enter the loop node.
    async fn run_loop(
        &self,
        walk: &mut Walk,
        node: &NodeDefinition,
        input: Value,
    ) -> Result<Step, EngineError> {
        let failed = |source: NodeError| EngineError::NodeExecution {
            node_id: node.id.clone(),
            source,
        };
        if walk.active_loops.iter().any(|id| id == &node.id) {
            return Err(failed(NodeError::InvalidConfig(format!(
                "loop '{}' is re-entered from inside its own body (via {})",
                node.id,
                walk.active_loops.join(" -> ")
            ))));
        }
        let config: LoopConfig = node_config::parse(node).map_err(failed)?;

        let requested = config.iterations.unwrap_or(self.config.default_loop_iterations);
        let iterations = requested.min(self.config.max_loop_iterations);
        if iterations < requested {
            warn!(
                "loop '{}' asked for {} iterations; capped at {}",
                node.id, requested, iterations
            );
        }

        let mut outputs = Vec::with_capacity(iterations as usize);
        for i in 0..iterations as usize {
            debug!(loop_id = %node.id, iteration = i, "loop iteration");
            let mut body = walk.iteration(&node.id, i);
            let tail = self
                .walk(&mut body, vec![config.target.clone()], Some(input.clone()), Some(node.id.as_str()))
                .await?
                .unwrap_or(Value::Null);

            let stop = match &config.stop_when {
                Some(spec) => self.dispatcher.evaluate(spec, &tail).map_err(failed)?,
                None => false,
            };
            outputs.push(tail);
            if stop {
                info!("loop '{}' stop condition met after {} iterations", node.id, i + 1);
                break;
            }
        }

        Ok(Step {
            output: Value::Array(outputs),
            next: walk.graph.downstream(&node.id).to_vec(),
        })
    }

    // -----------------------------------------------------------------------
    // Event sources
    // -----------------------------------------------------------------------

    /// Register a watch for the node's subject.  The path ends here; each
    /// delivered event starts its own walk at the node's successors.
    async fn register_watch(&self, walk: &Walk, node: &NodeDefinition) -> Result<Step, EngineError> {
        let config: WatchConfig = node_config::parse(node).map_err(|source| EngineError::NodeExecution {
            node_id: node.id.clone(),
            source,
        })?;

        let watch_id = Uuid::new_v4().to_string();
        let on_match = self
            .event_callback(walk, &node.id, &watch_id)
            .map_err(|source| EngineError::EventBridge { node_id: node.id.clone(), source })?;
        walk.run.reserve_watch(&watch_id, &node.id, &config.subject);

        let handle = match self.bridge.watch(&config.subject, on_match).await {
            Ok(handle) => handle,
            Err(source) => {
                walk.run.remove_watch(&watch_id);
                return Err(EngineError::EventBridge { node_id: node.id.clone(), source });
            }
        };

        if !walk.run.attach_watch(&watch_id, handle.clone()) {
            // Cancelled while the bridge was still registering.
            self.bridge.unwatch(&handle);
        }
        info!("node '{}' watching '{}' as {}", node.id, config.subject, watch_id);

        Ok(Step {
            output: json!({
                "watchId": watch_id,
                "subject": config.subject,
                "status": "watching",
            }),
            next: Vec::new(),
        })
    }

    /// Event walks are spawned on the runtime driving the registration, so
    /// one must exist.
    fn event_callback(
        &self,
        walk: &Walk,
        node_id: &str,
        watch_id: &str,
    ) -> Result<EventCallback, EventBridgeError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EventBridgeError::Unavailable(format!("no async runtime to deliver events on: {e}")))?;
        let engine = self.clone();
        let run = walk.run.clone();
        let graph = Arc::clone(&walk.graph);
        let execution = walk.execution;
        let node_id = node_id.to_owned();
        let watch_id = watch_id.to_owned();

        Ok(Arc::new(move |payload: Value| {
            if !run.is_watching(&watch_id) {
                debug!(watch_id = %watch_id, "dropping event for stopped watch");
                return;
            }
            engine.notifier.notify(ExecutionEvent::EventMatched {
                node_id: node_id.clone(),
                watch_id: watch_id.clone(),
                data: payload.clone(),
            });

            let engine = engine.clone();
            let run = run.clone();
            let graph = Arc::clone(&graph);
            let node_id = node_id.clone();
            runtime.spawn(async move {
                engine.event_walk(run, graph, execution, node_id, payload).await;
            });
        }))
    }

    /// One walk triggered by one event.  Failures stay inside this walk: the
    /// failing node is marked and reported, the workflow status is left alone.
    async fn event_walk(
        &self,
        run: WorkflowRun,
        graph: Arc<Graph>,
        execution: Uuid,
        node_id: String,
        payload: Value,
    ) {
        let walk_id = Uuid::new_v4();
        self.notifier.notify(ExecutionEvent::WalkStart { walk_id, node_id: node_id.clone() });

        let entries = graph.downstream(&node_id).to_vec();
        let mut walk = Walk::new(run, graph, walk_id, execution);
        walk.outputs.insert(node_id.clone(), payload.clone());

        match self.walk(&mut walk, entries, Some(payload), None).await {
            Ok(_) => {
                debug!(walk_id = %walk_id, "event walk completed");
                self.notifier.notify(ExecutionEvent::WalkComplete { walk_id, node_id });
            }
            Err(err) => {
                warn!("event walk {} from '{}' failed: {}", walk_id, node_id, err);
                self.notifier.notify(ExecutionEvent::WalkError {
                    walk_id,
                    node_id,
                    error: err.to_string(),
                });
            }
        }
    }
}
