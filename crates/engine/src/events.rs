//! Execution events and notifiers for observability.
//!
//! Events are emitted at every lifecycle transition so consumers can observe
//! progress, stream to UIs, log, or drive downstream automation.  The
//! notifier is handed to the engine by its owner; there is no process-wide
//! emitter.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events emitted during workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ExecutionEvent {
    #[serde(rename_all = "camelCase")]
    WorkflowStart { workflow_id: Uuid },

    #[serde(rename_all = "camelCase")]
    WorkflowComplete {
        workflow_id: Uuid,
        results: BTreeMap<String, Value>,
    },

    #[serde(rename_all = "camelCase")]
    WorkflowError { workflow_id: Uuid, error: String },

    #[serde(rename_all = "camelCase")]
    NodeStart { node_id: String },

    #[serde(rename_all = "camelCase")]
    NodeComplete { node_id: String, result: Value },

    #[serde(rename_all = "camelCase")]
    NodeError { node_id: String, error: String },

    /// A node of unrecognised type was run through the generic action path.
    #[serde(rename_all = "camelCase")]
    NodeAnomaly { node_id: String, node_type: String },

    /// An event source received a matching external event.
    #[serde(rename_all = "camelCase")]
    EventMatched {
        node_id: String,
        watch_id: String,
        data: Value,
    },

    /// An event-triggered walk began.
    #[serde(rename_all = "camelCase")]
    WalkStart { walk_id: Uuid, node_id: String },

    #[serde(rename_all = "camelCase")]
    WalkComplete { walk_id: Uuid, node_id: String },

    #[serde(rename_all = "camelCase")]
    WalkError {
        walk_id: Uuid,
        node_id: String,
        error: String,
    },
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event - implementations decide
/// what to do with them (broadcast, log, ignore, etc.).  Called from
/// whichever task is running the walk, so it must not block.
pub trait ExecutionNotifier: Send + Sync {
    fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
    fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// Unbounded so a slow consumer never stalls a walk; volume is a handful
/// of events per node.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
    pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        Self { sender }
    }

    /// Create a notifier together with the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl ExecutionNotifier for ChannelNotifier {
    fn notify(&self, event: ExecutionEvent) {
        // Receiver may have been dropped.
        let _ = self.sender.send(event);
    }
}

/// Forwards events to `tracing`, one line per event.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl ExecutionNotifier for TracingNotifier {
    fn notify(&self, event: ExecutionEvent) {
        match &event {
            ExecutionEvent::WorkflowError { workflow_id, error } => {
                error!(%workflow_id, %error, "workflow failed");
            }
            ExecutionEvent::NodeError { node_id, error } => {
                error!(%node_id, %error, "node failed");
            }
            ExecutionEvent::WalkError { walk_id, node_id, error } => {
                error!(%walk_id, %node_id, %error, "event walk failed");
            }
            ExecutionEvent::NodeAnomaly { node_id, node_type } => {
                warn!(%node_id, %node_type, "unknown node type ran as generic action");
            }
            other => match serde_json::to_string(other) {
                Ok(line) => info!(target: "chainflow::events", "{line}"),
                Err(_) => info!(target: "chainflow::events", "{other:?}"),
            },
        }
    }
}
