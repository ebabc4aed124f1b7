//! `engine` crate — workflow models, graph validation, and the execution engine.

pub mod bridge;
pub mod dag;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod executor;
pub mod memory_bridge;
pub mod models;
pub mod node_config;
pub mod run;

pub use bridge::{EventBridge, EventBridgeError, EventCallback, TransferEvent, WatchHandle};
pub use dag::{validate_dag, Graph};
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier, TracingNotifier};
pub use executor::{EngineConfig, ExecutionResult, WorkflowEngine};
pub use memory_bridge::InMemoryBridge;
pub use models::{Edge, NodeDefinition, NodeStatus, NodeType, Workflow, WorkflowStatus};
pub use run::{ResultStore, WatchInfo, WorkflowRun};

#[cfg(test)]
mod executor_tests;
