//! Handler contracts every node behaviour must fulfil.
//!
//! Three shapes exist because node types have different control-flow
//! semantics: `Transform` and `Predicate` are pure and synchronous, while
//! `ExecutableNode` covers effectful, possibly long-running actions.

use async_trait::async_trait;
use serde_json::Value;

use crate::NodeError;

/// Shared context passed to every handler during execution.
///
/// Defined here (in the nodes crate) so both the engine and individual
/// handler implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// ID of the parent workflow.
    pub workflow_id: uuid::Uuid,
    /// ID of the current execution run.
    pub execution_id: uuid::Uuid,
    /// ID of the walk this invocation belongs to.  Event-triggered walks
    /// each get their own.
    pub walk_id: uuid::Uuid,
    /// ID of the node being executed.
    pub node_id: String,
    /// Declared type name of the node (`action`, `swap`, ...).
    pub node_type: String,
    /// The node's raw configuration.
    pub config: Value,
    /// Zero-based loop iteration when running inside a loop body.
    pub iteration: Option<usize>,
}

/// Effectful node behaviour: network calls, contract interactions, alerts.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Execute the node, receive the predecessor's JSON output as `input`,
    /// and return a detail value describing what happened.
    async fn execute(
        &self,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError>;
}

/// Pure transformation applied by `transform` nodes.
pub trait Transform: Send + Sync {
    fn apply(&self, input: Value) -> Result<Value, NodeError>;
}

impl<F> Transform for F
where
    F: Fn(Value) -> Result<Value, NodeError> + Send + Sync,
{
    fn apply(&self, input: Value) -> Result<Value, NodeError> {
        self(input)
    }
}

/// Pure boolean decision used by `condition` nodes and loop stop conditions.
pub trait Predicate: Send + Sync {
    fn evaluate(&self, input: &Value) -> Result<bool, NodeError>;
}

impl<F> Predicate for F
where
    F: Fn(&Value) -> Result<bool, NodeError> + Send + Sync,
{
    fn evaluate(&self, input: &Value) -> Result<bool, NodeError> {
        self(input)
    }
}
