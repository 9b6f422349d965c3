pub mod adapter;
pub mod context;
pub mod node;
pub mod orchestrator;
pub mod scope;
pub mod value;

pub use adapter::{NodeContext, Triggered};
pub use context::ExecutionContext;
pub use node::{ExecutionMode, Node, NodeRegistry};
pub use orchestrator::{ExecutionConfig, ExecutionData, ExecutionOrchestrator, ExecutionResult, LoadedGraph, ParentHandle};
pub use scope::ScopeTracker;
pub use value::{FromValue, Value};
