//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node handler.
///
/// The engine never retries on its own; every variant fails the current
/// walk.  `Transient` is only a hint surfaced to the caller, who may choose
/// to re-invoke the workflow.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The handler ran and failed permanently.
    #[error("node handler failed: {0}")]
    Failed(String),

    /// The handler failed for a reason that may clear up on its own
    /// (network hiccup, rate limit, ...).
    #[error("transient node failure: {0}")]
    Transient(String),

    /// The node's configuration could not be understood by its handler.
    #[error("invalid node configuration: {0}")]
    InvalidConfig(String),

    /// Configuration names a handler that was never registered.
    #[error("no {kind} registered under '{name}'")]
    MissingHandler { kind: &'static str, name: String },
}

impl NodeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, NodeError::Transient(_))
    }
}
