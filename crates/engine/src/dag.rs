//! DAG validation and ordering — run this before executing a workflow.
//!
//! Rules enforced:
//! 1. Node IDs must be unique within the workflow.
//! 2. Every edge, `prev`/`next` link, branch or loop target and the
//!    configured entry must reference an existing node.
//! 3. The dependency graph must be acyclic.  A loop node's link to its own
//!    target is re-entry, not a dependency, and is left out.
//!
//! Ordering is a depth-first walk over predecessors with three-colour
//! marking, seeded in declaration order so unconstrained nodes keep the
//! order they were written in.

use std::collections::{HashMap, HashSet};

use crate::models::{NodeType, Workflow};
use crate::node_config::{branch_target, loop_target};
use crate::EngineError;

/// Resolved dependency structure of a workflow.
#[derive(Debug, Clone)]
pub struct Graph {
    order: Vec<String>,
    position: HashMap<String, usize>,
    downstream: HashMap<String, Vec<String>>,
    upstream: HashMap<String, Vec<String>>,
}

enum Mark {
    InProgress,
    Done,
}

impl Graph {
    /// Validate `workflow` and compute its execution order.
    ///
    /// # Errors
    /// - [`EngineError::EmptyWorkflow`] if there are no nodes.
    /// - [`EngineError::DuplicateNodeId`] if two nodes share an ID.
    /// - [`EngineError::UnknownNodeReference`] if anything references a missing node.
    /// - [`EngineError::CycleDetected`] naming a node on the cycle.
    pub fn build(workflow: &Workflow) -> Result<Self, EngineError> {
        if workflow.nodes.is_empty() {
            return Err(EngineError::EmptyWorkflow);
        }

        // -----------------------------------------------------------------------
        // 1. Ensure node IDs are unique
        // -----------------------------------------------------------------------
        let mut node_set: HashSet<&str> = HashSet::new();
        for node in &workflow.nodes {
            if !node_set.insert(node.id.as_str()) {
                return Err(EngineError::DuplicateNodeId(node.id.clone()));
            }
        }

        let check = |id: &str, side: &'static str| -> Result<(), EngineError> {
            if node_set.contains(id) {
                Ok(())
            } else {
                Err(EngineError::UnknownNodeReference { node_id: id.to_owned(), side })
            }
        };

        // -----------------------------------------------------------------------
        // 2. Validate references and collect dependencies
        // -----------------------------------------------------------------------
        let loop_targets: HashMap<&str, &str> = workflow
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Loop)
            .filter_map(|n| loop_target(n).map(|t| (n.id.as_str(), t)))
            .collect();

        let mut links: Vec<(&str, &str)> = Vec::new();
        for node in &workflow.nodes {
            if let Some(prev) = node.prev.as_deref() {
                check(prev, "prev")?;
                links.push((prev, node.id.as_str()));
            }
            if let Some(next) = node.next.as_deref() {
                check(next, "next")?;
                links.push((node.id.as_str(), next));
            }
            match node.node_type {
                NodeType::Condition => {
                    if let Some(target) = branch_target(node) {
                        check(target, "target")?;
                        links.push((node.id.as_str(), target));
                    }
                }
                NodeType::Loop => {
                    if let Some(target) = loop_target(node) {
                        check(target, "target")?;
                        if target == node.id {
                            return Err(EngineError::CycleDetected { node_id: node.id.clone() });
                        }
                    }
                }
                _ => {}
            }
        }
        for edge in &workflow.edges {
            check(&edge.from, "from")?;
            check(&edge.to, "to")?;
            links.push((edge.from.as_str(), edge.to.as_str()));
        }
        if let Some(entry) = workflow.entry.as_deref() {
            check(entry, "entry")?;
        }

        let mut downstream: HashMap<String, Vec<String>> = HashMap::new();
        let mut upstream: HashMap<String, Vec<String>> = HashMap::new();
        for node in &workflow.nodes {
            downstream.entry(node.id.clone()).or_default();
            upstream.entry(node.id.clone()).or_default();
        }
        for (from, to) in links {
            if loop_targets.get(from) == Some(&to) {
                continue;
            }
            let succ = downstream.entry(from.to_owned()).or_default();
            if !succ.iter().any(|s| s == to) {
                succ.push(to.to_owned());
                upstream.entry(to.to_owned()).or_default().push(from.to_owned());
            }
        }

        // -----------------------------------------------------------------------
        // 3. Depth-first ordering with cycle detection
        // -----------------------------------------------------------------------
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut order: Vec<String> = Vec::with_capacity(workflow.nodes.len());
        for node in &workflow.nodes {
            visit(&node.id, &upstream, &mut marks, &mut order)?;
        }

        let position = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        Ok(Self { order, position, downstream, upstream })
    }

    /// Node IDs in execution order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn into_order(self) -> Vec<String> {
        self.order
    }

    pub fn position(&self, node_id: &str) -> Option<usize> {
        self.position.get(node_id).copied()
    }

    /// Nodes that depend directly on `node_id`.
    pub fn downstream(&self, node_id: &str) -> &[String] {
        self.downstream.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes `node_id` depends on directly.
    pub fn upstream(&self, node_id: &str) -> &[String] {
        self.upstream.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn visit<'a>(
    node_id: &'a str,
    upstream: &'a HashMap<String, Vec<String>>,
    marks: &mut HashMap<&'a str, Mark>,
    order: &mut Vec<String>,
) -> Result<(), EngineError> {
    match marks.get(node_id) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::InProgress) => {
            return Err(EngineError::CycleDetected { node_id: node_id.to_owned() });
        }
        None => {}
    }

    marks.insert(node_id, Mark::InProgress);
    for pred in upstream.get(node_id).into_iter().flatten() {
        visit(pred, upstream, marks, order)?;
    }
    marks.insert(node_id, Mark::Done);
    order.push(node_id.to_owned());
    Ok(())
}

/// Validate the workflow's DAG and return nodes in topological execution order.
///
/// # Errors
/// See [`Graph::build`].
pub fn validate_dag(workflow: &Workflow) -> Result<Vec<String>, EngineError> {
    Graph::build(workflow).map(Graph::into_order)
}
