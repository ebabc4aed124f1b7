//! Typed views over a node's opaque `config` value.
//!
//! Only the keys a handler needs to dispatch are read; anything else in the
//! configuration is ignored.

use nodes::builtins::Comparison;
use nodes::NodeError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::models::NodeDefinition;

/// `transform`: `{ "transformation": "double" }`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransformConfig {
    pub transformation: String,
}

/// A decision as written in configuration: a literal, the name of a
/// registered predicate, or an inline comparison.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ConditionSpec {
    Literal(bool),
    Named(String),
    Comparison(Comparison),
}

/// `condition`: `{ "condition": ..., "target": "<node id>" }`.
///
/// The branch target is read with [`branch_target`], the same lookup graph
/// validation uses, so both agree when several spellings are present.
#[derive(Debug, Clone, Deserialize)]
pub struct ConditionConfig {
    pub condition: ConditionSpec,
}

/// `action`, `swap`, `notification` and unknown types.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionConfig {
    /// Registered handler name; falls back to the node type name.
    #[serde(default)]
    pub action: Option<String>,
}

/// `loop`: `{ "target": "<node id>", "iterations": 3, "stopWhen": ... }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopConfig {
    pub target: String,
    #[serde(default)]
    pub iterations: Option<u32>,
    /// Checked against each iteration's output; the loop ends once it holds.
    #[serde(default, alias = "stop_when")]
    pub stop_when: Option<ConditionSpec>,
}

/// `event-source`: `{ "subject": "0x..." }`.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    #[serde(alias = "walletAddress", alias = "wallet_address")]
    pub subject: String,
}

/// Parse a node's configuration into `T`.  A missing (`null`) configuration
/// is read as an empty object.
///
/// # Errors
/// [`NodeError::InvalidConfig`] naming the node when the shape doesn't match.
pub fn parse<T: DeserializeOwned>(node: &NodeDefinition) -> Result<T, NodeError> {
    let raw = match &node.config {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(raw).map_err(|e| {
        NodeError::InvalidConfig(format!("node '{}' ({}): {e}", node.id, node.node_type))
    })
}

/// Input configured directly on a root node.
pub fn configured_input(node: &NodeDefinition) -> Option<&Value> {
    node.config.get("input")
}

/// The true-branch target of a condition node.  `target` wins over
/// `trueTarget`, which wins over `true_target`.
pub fn branch_target(node: &NodeDefinition) -> Option<&str> {
    ["target", "trueTarget", "true_target"]
        .iter()
        .find_map(|key| node.config.get(*key).and_then(Value::as_str))
}

/// The re-entry target of a loop node, read without full parsing.
pub fn loop_target(node: &NodeDefinition) -> Option<&str> {
    node.config.get("target").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodes::builtins::Operator;
    use serde_json::json;

    #[test]
    fn condition_accepts_all_three_shapes() {
        let literal = NodeDefinition::new("c", "condition", json!({ "condition": false, "trueTarget": "2" }));
        let cfg: ConditionConfig = parse(&literal).unwrap();
        assert_eq!(cfg.condition, ConditionSpec::Literal(false));
        assert_eq!(branch_target(&literal), Some("2"));

        let named = NodeDefinition::new("c", "condition", json!({ "condition": "truthy" }));
        let cfg: ConditionConfig = parse(&named).unwrap();
        assert_eq!(cfg.condition, ConditionSpec::Named("truthy".into()));
        assert!(branch_target(&named).is_none());

        let inline = NodeDefinition::new(
            "c",
            "condition",
            json!({ "condition": { "operator": "gte", "value": 3 }, "target": "x" }),
        );
        let cfg: ConditionConfig = parse(&inline).unwrap();
        assert!(matches!(
            cfg.condition,
            ConditionSpec::Comparison(Comparison { operator: Operator::Gte, .. })
        ));
    }

    #[test]
    fn every_target_spelling_at_once_still_parses() {
        let node = NodeDefinition::new(
            "c",
            "condition",
            json!({ "condition": true, "target": "a", "trueTarget": "b", "true_target": "c" }),
        );
        let cfg: ConditionConfig = parse(&node).unwrap();
        assert_eq!(cfg.condition, ConditionSpec::Literal(true));
        assert_eq!(branch_target(&node), Some("a"));
    }

    #[test]
    fn null_config_reads_as_empty_object() {
        let node = NodeDefinition::new("a", "action", Value::Null);
        let cfg: ActionConfig = parse(&node).unwrap();
        assert!(cfg.action.is_none());
    }

    #[test]
    fn loop_without_target_is_invalid() {
        let node = NodeDefinition::new("l", "loop", json!({ "iterations": 2 }));
        let err = parse::<LoopConfig>(&node).unwrap_err();
        assert!(matches!(err, NodeError::InvalidConfig(msg) if msg.contains("'l'")));
    }

    #[test]
    fn wallet_address_is_a_subject() {
        let node = NodeDefinition::new("w", "event-source", json!({ "walletAddress": "0xAbC" }));
        let cfg: WatchConfig = parse(&node).unwrap();
        assert_eq!(cfg.subject, "0xAbC");
    }
}
