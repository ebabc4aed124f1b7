//! Maps a node's declared type to the handler that runs it.
//!
//! `transform`, `condition` and the action family are fully handled here.
//! `loop` and `event-source` need to start walks of their own, so the
//! orchestrator drives them and only borrows [`NodeDispatcher::evaluate`]
//! for loop stop conditions.

use std::sync::Arc;

use nodes::{ExecutionContext, HandlerRegistry, NodeError, Predicate};
use serde_json::{json, Value};
use tracing::debug;

use crate::models::{NodeDefinition, NodeType};
use crate::node_config::{self, ActionConfig, ConditionConfig, ConditionSpec, TransformConfig};

/// Result of evaluating a `condition` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub holds: bool,
    /// Configured true-branch target, if any.
    pub target: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NodeDispatcher {
    registry: Arc<HandlerRegistry>,
}

impl NodeDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    /// Run the node's handler and return its output.
    ///
    /// Conditions yield their decision as a JSON boolean; use
    /// [`NodeDispatcher::condition`] to also learn the branch target.
    ///
    /// # Errors
    /// Whatever the handler reports, or [`NodeError::InvalidConfig`] for
    /// `loop`/`event-source` nodes, which are not dispatchable on their own.
    pub async fn dispatch(
        &self,
        node: &NodeDefinition,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        match &node.node_type {
            NodeType::Transform => self.transform(node, input),
            NodeType::Condition => self.condition(node, &input).map(|d| Value::Bool(d.holds)),
            NodeType::Action | NodeType::Swap | NodeType::Notification | NodeType::Unknown(_) => {
                self.action(node, input, ctx).await
            }
            NodeType::Loop | NodeType::EventSource => Err(NodeError::InvalidConfig(format!(
                "node '{}' ({}) is driven by the engine, not dispatched",
                node.id, node.node_type
            ))),
        }
    }

    /// Apply the configured transformation to `input`.
    pub fn transform(&self, node: &NodeDefinition, input: Value) -> Result<Value, NodeError> {
        let config: TransformConfig = node_config::parse(node)?;
        let transform = self.registry.transform(&config.transformation)?;
        debug!(node_id = %node.id, transformation = %config.transformation, "applying transform");
        transform.apply(input)
    }

    pub fn condition(&self, node: &NodeDefinition, input: &Value) -> Result<Decision, NodeError> {
        let config: ConditionConfig = node_config::parse(node)?;
        let holds = self.evaluate(&config.condition, input)?;
        debug!(node_id = %node.id, holds, "condition evaluated");
        Ok(Decision { holds, target: node_config::branch_target(node).map(str::to_owned) })
    }

    /// Evaluate a condition as written in configuration.
    pub fn evaluate(&self, spec: &ConditionSpec, input: &Value) -> Result<bool, NodeError> {
        match spec {
            ConditionSpec::Literal(b) => Ok(*b),
            ConditionSpec::Named(name) => self.registry.predicate(name)?.evaluate(input),
            ConditionSpec::Comparison(cmp) => cmp.evaluate(input),
        }
    }

    /// Run an effectful handler and wrap its detail in an operation record:
    /// `{ "success": true, "id": <node id>, "detail"?: <detail> }`.
    ///
    /// The handler is the one named by `config.action`, else the one
    /// registered under the node type's name, else the registry default.
    pub async fn action(
        &self,
        node: &NodeDefinition,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let config: ActionConfig = node_config::parse(node)?;
        let handler = match &config.action {
            Some(name) => self
                .registry
                .action(name)
                .ok_or_else(|| NodeError::MissingHandler { kind: "action", name: name.clone() })?,
            None => self
                .registry
                .action(node.node_type.as_str())
                .unwrap_or_else(|| self.registry.default_action()),
        };

        let detail = handler.execute(input, ctx).await?;

        let mut record = json!({ "success": true, "id": node.id });
        if !detail.is_null() {
            record["detail"] = detail;
        }
        Ok(record)
    }
}
