//! Built-in node kinds.
//!
//! Exec continuation goes through the `then` pin unless a node documents
//! otherwise; graphs declare it (possibly unwired) on every node that has it.

use crate::runtime::node::NodeRegistry;
use std::sync::Arc;

pub mod common;
pub mod flow;
pub mod resource;
pub mod subgraph;

pub use common::{LogNode, SetOutputNode};
pub use flow::SequenceNode;
pub use resource::{LoadJsonNode, LoadMeshNode, LoadTextureNode};
pub use subgraph::ExecuteBlueprintNode;

pub fn register_builtins(registry: &mut NodeRegistry) {
    registry.register(Arc::new(LogNode));
    registry.register(Arc::new(SetOutputNode));
    registry.register(Arc::new(SequenceNode));
    registry.register(Arc::new(LoadTextureNode));
    registry.register(Arc::new(LoadMeshNode));
    registry.register(Arc::new(LoadJsonNode));
    registry.register(Arc::new(ExecuteBlueprintNode));
}
