//! Built-in handlers available through [`HandlerRegistry::builtin`].
//!
//! [`HandlerRegistry::builtin`]: crate::HandlerRegistry::builtin

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::traits::ExecutionContext;
use crate::{ExecutableNode, HandlerRegistry, NodeError, Predicate};

pub(crate) fn register_all(registry: &mut HandlerRegistry) {
    registry.register_transform("identity", |v: Value| -> Result<Value, NodeError> { Ok(v) });
    registry.register_transform("double", |v: Value| arithmetic("double", &v, |i| i.checked_mul(2), |f| f * 2.0));
    registry.register_transform("increment", |v: Value| arithmetic("increment", &v, |i| i.checked_add(1), |f| f + 1.0));
    registry.register_transform("negate", |v: Value| arithmetic("negate", &v, |i| i.checked_neg(), |f| -f));
    registry.register_transform("to_string", |v: Value| -> Result<Value, NodeError> {
        Ok(match v {
            Value::String(s) => Value::String(s),
            other => Value::String(other.to_string()),
        })
    });

    registry.register_predicate("always", |_: &Value| -> Result<bool, NodeError> { Ok(true) });
    registry.register_predicate("never", |_: &Value| -> Result<bool, NodeError> { Ok(false) });
    registry.register_predicate("truthy", |v: &Value| -> Result<bool, NodeError> { Ok(is_truthy(v)) });
    registry.register_predicate("is_null", |v: &Value| -> Result<bool, NodeError> { Ok(v.is_null()) });
}

fn arithmetic(
    name: &str,
    input: &Value,
    int_op: impl Fn(i64) -> Option<i64>,
    float_op: impl Fn(f64) -> f64,
) -> Result<Value, NodeError> {
    if let Some(i) = input.as_i64() {
        return int_op(i)
            .map(Value::from)
            .ok_or_else(|| NodeError::Failed(format!("{name}: integer overflow on {i}")));
    }
    match input.as_f64() {
        Some(f) => Ok(json!(float_op(f))),
        None => Err(NodeError::Failed(format!("{name} expects a number, got {input}"))),
    }
}

/// JavaScript-like truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` are
/// false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// ---------------------------------------------------------------------------
// Comparison predicate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Truthy,
    Exists,
}

/// Inline predicate written directly in a node's configuration, e.g.
/// `{ "operator": "gt", "pointer": "/value", "value": 100 }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    /// JSON pointer into the input; the whole input when absent.
    #[serde(default)]
    pub pointer: Option<String>,
}

impl Predicate for Comparison {
    fn evaluate(&self, input: &Value) -> Result<bool, NodeError> {
        let subject = match &self.pointer {
            Some(pointer) => input.pointer(pointer),
            None => Some(input),
        };

        let Some(subject) = subject else {
            // A missing field only satisfies `ne`.
            return Ok(self.operator == Operator::Ne);
        };

        let ordered = |accept: fn(std::cmp::Ordering) -> bool| -> Result<bool, NodeError> {
            match (subject.as_f64(), self.value.as_f64()) {
                (Some(a), Some(b)) => Ok(a.partial_cmp(&b).is_some_and(accept)),
                _ => Err(NodeError::InvalidConfig(format!(
                    "operator {:?} needs numeric operands, got {subject} and {}",
                    self.operator, self.value
                ))),
            }
        };

        match self.operator {
            Operator::Eq => Ok(loosely_equal(subject, &self.value)),
            Operator::Ne => Ok(!loosely_equal(subject, &self.value)),
            Operator::Gt => ordered(|o| o.is_gt()),
            Operator::Gte => ordered(|o| o.is_ge()),
            Operator::Lt => ordered(|o| o.is_lt()),
            Operator::Lte => ordered(|o| o.is_le()),
            Operator::Truthy => Ok(is_truthy(subject)),
            Operator::Exists => Ok(!subject.is_null()),
        }
    }
}

/// Numbers compare by value so `10` equals `10.0`.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

// ---------------------------------------------------------------------------
// Default action
// ---------------------------------------------------------------------------

/// Acknowledges the request without side effects.  Stands in for
/// action-class nodes that name no handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcknowledgeAction;

#[async_trait]
impl ExecutableNode for AcknowledgeAction {
    async fn execute(&self, _input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        debug!(node_id = %ctx.node_id, node_type = %ctx.node_type, "acknowledged");
        Ok(Value::Null)
    }
}
