//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like
//! in memory.  They are plain definitions: execution state lives in
//! [`WorkflowRun`](crate::run::WorkflowRun), never on the definition itself.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// NodeType
// ---------------------------------------------------------------------------

/// The closed set of node behaviours the engine knows how to drive.
///
/// Serialised as its kebab-case name.  Unrecognised names are kept in
/// [`NodeType::Unknown`] so they can be reported instead of rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    Transform,
    Condition,
    Action,
    Swap,
    Notification,
    Loop,
    /// Waits for external events (e.g. token transfers on a wallet).
    EventSource,
    Unknown(String),
}

impl NodeType {
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Transform => "transform",
            NodeType::Condition => "condition",
            NodeType::Action => "action",
            NodeType::Swap => "swap",
            NodeType::Notification => "notification",
            NodeType::Loop => "loop",
            NodeType::EventSource => "event-source",
            NodeType::Unknown(name) => name,
        }
    }
}

impl From<String> for NodeType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "transform" => NodeType::Transform,
            "condition" => NodeType::Condition,
            "action" => NodeType::Action,
            "swap" => NodeType::Swap,
            "notification" => NodeType::Notification,
            "loop" => NodeType::Loop,
            "event-source" | "wallet-erc20-transfers" => NodeType::EventSource,
            _ => NodeType::Unknown(name),
        }
    }
}

impl From<&str> for NodeType {
    fn from(name: &str) -> Self {
        NodeType::from(name.to_owned())
    }
}

impl From<NodeType> for String {
    fn from(node_type: NodeType) -> Self {
        node_type.as_str().to_owned()
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle of a workflow execution: `pending -> running -> {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Lifecycle of a single node.  Loop bodies pass through it once per
/// iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

// ---------------------------------------------------------------------------
// NodeDefinition
// ---------------------------------------------------------------------------

/// A single step in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique identifier within this workflow (referenced by edges).
    pub id: String,
    #[serde(rename = "type", alias = "node_type")]
    pub node_type: NodeType,
    /// Arbitrary configuration consumed by the matching handler.
    #[serde(default)]
    pub config: Value,
    /// Logical predecessor.  `None` marks a root that reads the
    /// workflow-level input.
    #[serde(default)]
    pub prev: Option<String>,
    /// Linear successor.
    #[serde(default)]
    pub next: Option<String>,
}

impl NodeDefinition {
    pub fn new(id: impl Into<String>, node_type: impl Into<NodeType>, config: Value) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config,
            prev: None,
            next: None,
        }
    }

    pub fn with_prev(mut self, prev: impl Into<String>) -> Self {
        self.prev = Some(prev.into());
        self
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Directed edge from one node to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(alias = "source")]
    pub from: String,
    #[serde(alias = "target")]
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self { from: from.into(), to: to.into() }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A complete workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Input handed to root nodes that carry no `input` of their own.
    #[serde(default)]
    pub input: Value,
    /// Explicit entry node; the first node in execution order otherwise.
    #[serde(default)]
    pub entry: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    /// Convenience constructor for testing.
    pub fn new(name: impl Into<String>, nodes: Vec<NodeDefinition>, edges: Vec<Edge>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            nodes,
            edges,
            input: Value::Null,
            entry: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = Some(entry.into());
        self
    }

    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
