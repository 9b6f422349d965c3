use crate::runtime::adapter::NodeContext;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Runs on a spawned task; the branch completes when the future does.
    Async,
    /// Runs inline when the engine invokes it and completes its branch
    /// immediately. Only spawned if it unexpectedly suspends.
    Sync,
}

/// 节点接口 (Node)
/// Implementation of one node kind. Nodes are stateless; per-call state
/// arrives through [`NodeContext`].
#[async_trait]
pub trait Node: Send + Sync + Debug {
    fn kind(&self) -> &str;

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Async
    }

    /// Checks authored params when a graph is loaded.
    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<()>;
}

/// Node kinds known to the runtime, handed to the engine at load time.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, Arc<dyn Node>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in node registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::nodes::register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, node: Arc<dyn Node>) {
        self.nodes.insert(node.kind().to_string(), node);
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.nodes.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}
