//! `nodes` crate — handler contracts and built-in node behaviour.
//!
//! Every piece of node-type logic the engine dispatches to implements one of
//! [`Transform`], [`Predicate`] or [`ExecutableNode`], and is found by name
//! through a [`HandlerRegistry`].

pub mod builtins;
pub mod error;
pub mod mock;
pub mod registry;
pub mod traits;

pub use error::NodeError;
pub use registry::HandlerRegistry;
pub use traits::{ExecutableNode, ExecutionContext, Predicate, Transform};
