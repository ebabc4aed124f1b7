//! Engine-level error types.

use nodes::NodeError;
use thiserror::Error;
use uuid::Uuid;

use crate::bridge::EventBridgeError;

/// Errors produced by the workflow engine (validation + execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge, link or target references a node ID that doesn't exist.
    #[error("reference to unknown node '{node_id}' ({side})")]
    UnknownNodeReference {
        node_id: String,
        side: &'static str,
    },

    /// The workflow has no nodes to run.
    #[error("workflow has no nodes")]
    EmptyWorkflow,

    /// Ordering found a dependency cycle through `node_id`.
    #[error("workflow graph contains a cycle through node '{node_id}'")]
    CycleDetected { node_id: String },

    // ------ Execution errors ------

    /// A node's handler failed; the walk it belonged to is aborted.
    #[error("node '{node_id}' failed: {source}")]
    NodeExecution {
        node_id: String,
        source: NodeError,
    },

    /// An event-source node could not register its watch.
    #[error("event source '{node_id}' could not watch: {source}")]
    EventBridge {
        node_id: String,
        source: EventBridgeError,
    },

    /// The run is already executing; one run allows one execution at a time.
    #[error("workflow run {0} is already running")]
    AlreadyRunning(Uuid),
}

impl EngineError {
    /// The node the error is attributed to, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            EngineError::CycleDetected { node_id }
            | EngineError::NodeExecution { node_id, .. }
            | EngineError::EventBridge { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    /// Whether re-invoking the workflow could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::NodeExecution { source, .. } => source.is_transient(),
            EngineError::EventBridge { .. } => true,
            _ => false,
        }
    }
}
