//! Named handler lookup.
//!
//! Workflow configuration refers to behaviour by name (`"transformation":
//! "double"`, `"action": "send_alert"`).  The registry resolves those names
//! to handler objects; production code registers real business logic and
//! tests register deterministic fakes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::builtins::{self, AcknowledgeAction};
use crate::{ExecutableNode, NodeError, Predicate, Transform};

pub struct HandlerRegistry {
    transforms: HashMap<String, Arc<dyn Transform>>,
    predicates: HashMap<String, Arc<dyn Predicate>>,
    actions: HashMap<String, Arc<dyn ExecutableNode>>,
    /// Used by action-class nodes that name no handler of their own.
    default_action: Arc<dyn ExecutableNode>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self {
            transforms: HashMap::new(),
            predicates: HashMap::new(),
            actions: HashMap::new(),
            default_action: Arc::new(AcknowledgeAction),
        }
    }
}

impl HandlerRegistry {
    /// An empty registry whose only behaviour is the acknowledging default
    /// action.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in transforms and predicates.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        builtins::register_all(&mut registry);
        registry
    }

    pub fn register_transform(&mut self, name: impl Into<String>, transform: impl Transform + 'static) {
        self.transforms.insert(name.into(), Arc::new(transform));
    }

    pub fn register_predicate(&mut self, name: impl Into<String>, predicate: impl Predicate + 'static) {
        self.predicates.insert(name.into(), Arc::new(predicate));
    }

    pub fn register_action(&mut self, name: impl Into<String>, action: Arc<dyn ExecutableNode>) {
        self.actions.insert(name.into(), action);
    }

    pub fn with_transform(mut self, name: impl Into<String>, transform: impl Transform + 'static) -> Self {
        self.register_transform(name, transform);
        self
    }

    pub fn with_predicate(mut self, name: impl Into<String>, predicate: impl Predicate + 'static) -> Self {
        self.register_predicate(name, predicate);
        self
    }

    pub fn with_action(mut self, name: impl Into<String>, action: Arc<dyn ExecutableNode>) -> Self {
        self.register_action(name, action);
        self
    }

    pub fn with_default_action(mut self, action: Arc<dyn ExecutableNode>) -> Self {
        self.default_action = action;
        self
    }

    /// Look up a transform by name.
    ///
    /// # Errors
    /// [`NodeError::MissingHandler`] if nothing is registered under `name`.
    pub fn transform(&self, name: &str) -> Result<Arc<dyn Transform>, NodeError> {
        self.transforms
            .get(name)
            .cloned()
            .ok_or_else(|| NodeError::MissingHandler { kind: "transform", name: name.to_owned() })
    }

    /// Look up a predicate by name.
    ///
    /// # Errors
    /// [`NodeError::MissingHandler`] if nothing is registered under `name`.
    pub fn predicate(&self, name: &str) -> Result<Arc<dyn Predicate>, NodeError> {
        self.predicates
            .get(name)
            .cloned()
            .ok_or_else(|| NodeError::MissingHandler { kind: "predicate", name: name.to_owned() })
    }

    pub fn action(&self, name: &str) -> Option<Arc<dyn ExecutableNode>> {
        self.actions.get(name).cloned()
    }

    pub fn default_action(&self) -> Arc<dyn ExecutableNode> {
        Arc::clone(&self.default_action)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut transforms: Vec<_> = self.transforms.keys().collect();
        let mut predicates: Vec<_> = self.predicates.keys().collect();
        let mut actions: Vec<_> = self.actions.keys().collect();
        transforms.sort();
        predicates.sort();
        actions.sort();
        f.debug_struct("HandlerRegistry")
            .field("transforms", &transforms)
            .field("predicates", &predicates)
            .field("actions", &actions)
            .finish_non_exhaustive()
    }
}
