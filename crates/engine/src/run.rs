//! Per-execution state shared by every walk of one workflow run.
//!
//! The initial walk and any number of event-triggered walks write here
//! concurrently.  Every write goes through one mutex, so a node's recorded
//! status and output always reflect the most recent completed write, never
//! a torn mix of two walks.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::bridge::WatchHandle;
use crate::models::{NodeStatus, Workflow, WorkflowStatus};
use crate::EngineError;

/// Node id → most recent output.
pub type ResultStore = BTreeMap<String, Value>;

/// A standing watch registered by an event-source node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchInfo {
    pub watch_id: String,
    pub node_id: String,
    pub subject: String,
}

#[derive(Debug)]
struct ActiveWatch {
    node_id: String,
    subject: String,
    /// `None` while the bridge is still registering.
    handle: Option<WatchHandle>,
}

#[derive(Debug)]
struct RunState {
    execution_id: Uuid,
    status: WorkflowStatus,
    nodes: HashMap<String, NodeStatus>,
    results: ResultStore,
    watches: BTreeMap<String, ActiveWatch>,
    anomalies: Vec<String>,
}

impl RunState {
    fn fresh(workflow: &Workflow) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: WorkflowStatus::Pending,
            nodes: workflow
                .nodes
                .iter()
                .map(|n| (n.id.clone(), NodeStatus::Pending))
                .collect(),
            results: ResultStore::new(),
            watches: BTreeMap::new(),
            anomalies: Vec::new(),
        }
    }
}

/// Handle to one execution of a workflow.  Cheap to clone; clones share
/// state.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    workflow: Arc<Workflow>,
    state: Arc<Mutex<RunState>>,
}

impl WorkflowRun {
    pub fn new(workflow: Workflow) -> Self {
        let state = RunState::fresh(&workflow);
        Self {
            workflow: Arc::new(workflow),
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub(crate) fn workflow_arc(&self) -> Arc<Workflow> {
        Arc::clone(&self.workflow)
    }

    pub fn execution_id(&self) -> Uuid {
        self.lock().execution_id
    }

    pub fn status(&self) -> WorkflowStatus {
        self.lock().status
    }

    pub fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.lock().nodes.get(node_id).copied()
    }

    pub fn node_output(&self, node_id: &str) -> Option<Value> {
        self.lock().results.get(node_id).cloned()
    }

    /// Snapshot of the result store.
    pub fn results(&self) -> ResultStore {
        self.lock().results.clone()
    }

    pub fn watches(&self) -> Vec<WatchInfo> {
        self.lock()
            .watches
            .iter()
            .map(|(id, w)| WatchInfo {
                watch_id: id.clone(),
                node_id: w.node_id.clone(),
                subject: w.subject.clone(),
            })
            .collect()
    }

    /// IDs of nodes whose type was not recognised, in the order they ran.
    pub fn anomalies(&self) -> Vec<String> {
        self.lock().anomalies.clone()
    }

    // -----------------------------------------------------------------------
    // Engine-side mutation
    // -----------------------------------------------------------------------

    /// Move to `running`.  A run that already finished is reset first and
    /// the bridge handles of its old watches are returned so the caller can
    /// release them.
    pub(crate) fn begin(&self) -> Result<Vec<WatchHandle>, EngineError> {
        let mut state = self.lock();
        match state.status {
            WorkflowStatus::Running => return Err(EngineError::AlreadyRunning(self.workflow.id)),
            WorkflowStatus::Pending => {
                state.status = WorkflowStatus::Running;
                return Ok(Vec::new());
            }
            WorkflowStatus::Completed | WorkflowStatus::Failed => {}
        }

        let stale = std::mem::replace(&mut *state, RunState::fresh(&self.workflow));
        state.status = WorkflowStatus::Running;
        Ok(stale.watches.into_values().filter_map(|w| w.handle).collect())
    }

    pub(crate) fn finish(&self, status: WorkflowStatus) {
        self.lock().status = status;
    }

    /// Writes below carry the execution they belong to.  A walk that
    /// outlives its execution (an event walk still running when the run is
    /// restarted) has its writes dropped instead of leaking into the new
    /// execution's state.  Each returns whether the write was applied.
    pub(crate) fn mark_node(&self, execution_id: Uuid, node_id: &str, status: NodeStatus) -> bool {
        let mut state = self.lock();
        if state.execution_id != execution_id {
            return stale_write(execution_id, node_id);
        }
        state.nodes.insert(node_id.to_owned(), status);
        true
    }

    pub(crate) fn record_output(&self, execution_id: Uuid, node_id: &str, output: Value) -> bool {
        let mut state = self.lock();
        if state.execution_id != execution_id {
            return stale_write(execution_id, node_id);
        }
        state.nodes.insert(node_id.to_owned(), NodeStatus::Completed);
        state.results.insert(node_id.to_owned(), output);
        true
    }

    pub(crate) fn record_anomaly(&self, execution_id: Uuid, node_id: &str) -> bool {
        let mut state = self.lock();
        if state.execution_id != execution_id {
            return stale_write(execution_id, node_id);
        }
        state.anomalies.push(node_id.to_owned());
        true
    }

    /// Latest output of `node_id`, only if it belongs to `execution_id`.
    pub(crate) fn output_in(&self, execution_id: Uuid, node_id: &str) -> Option<Value> {
        let state = self.lock();
        if state.execution_id != execution_id {
            return None;
        }
        state.results.get(node_id).cloned()
    }

    /// Claim a watch id before the bridge is asked to watch, so events that
    /// arrive before `watch` returns are not mistaken for stale ones.
    pub(crate) fn reserve_watch(&self, watch_id: &str, node_id: &str, subject: &str) {
        self.lock().watches.insert(
            watch_id.to_owned(),
            ActiveWatch { node_id: node_id.to_owned(), subject: subject.to_owned(), handle: None },
        );
    }

    /// Attach the bridge handle to a reserved watch.  Returns `false` if the
    /// watch was cancelled in the meantime.
    pub(crate) fn attach_watch(&self, watch_id: &str, handle: WatchHandle) -> bool {
        match self.lock().watches.get_mut(watch_id) {
            Some(w) => {
                w.handle = Some(handle);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_watching(&self, watch_id: &str) -> bool {
        self.lock().watches.contains_key(watch_id)
    }

    /// Forget a watch.  The outer `Option` says whether it existed; the
    /// inner one carries its bridge handle if registration had finished.
    pub(crate) fn remove_watch(&self, watch_id: &str) -> Option<Option<WatchHandle>> {
        self.lock().watches.remove(watch_id).map(|w| w.handle)
    }

    pub(crate) fn watch_ids(&self) -> Vec<String> {
        self.lock().watches.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn stale_write(execution_id: Uuid, node_id: &str) -> bool {
    debug!(%execution_id, node_id, "dropping write from a superseded execution");
    false
}
