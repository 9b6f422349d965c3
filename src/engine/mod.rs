//! Seam to the graph interpreter.
//!
//! Graph traversal is owned by a [`GraphEngine`]; the runtime only tracks
//! scopes and runs node implementations when the engine asks for them
//! through [`EngineHost`].

use crate::error::EngineError;
use crate::resource::ResourceId;
use crate::runtime::node::NodeRegistry;
use crate::runtime::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub mod local;
pub mod native;

pub use self::local::LocalEngine;
pub use self::native::NativeEngine;

/// Opaque handle of one execution branch. Unique within a run.
pub type ScopeId = u64;

/// Scope of the entry branch of every run.
pub const ROOT_SCOPE: ScopeId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphHandle(pub u64);

impl fmt::Display for GraphHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph#{}", self.0)
    }
}

/// A declared graph input or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinDecl {
    pub name: String,
    #[serde(rename = "type", default = "any_type")]
    pub kind: String,
}

fn any_type() -> String {
    "any".to_string()
}

/// A request from the engine to run one node on a scope.
#[derive(Debug, Clone)]
pub struct NodeCall {
    pub scope: ScopeId,
    pub node_id: String,
    pub kind: String,
    pub params: serde_json::Value,
}

/// Callbacks an engine issues against the execution it is driving.
///
/// Implementations must not panic out of these methods when they are
/// reached from foreign code.
pub trait EngineHost: Send + Sync {
    fn scope_dispatched(&self, scope: ScopeId);
    fn scope_completed(&self, scope: ScopeId);
    fn invoke_node(&self, call: NodeCall);
    fn bind_input(&self, node_id: &str, pin: &str, value: Value);
    fn read_output(&self, node_id: &str, pin: &str) -> Option<Value>;
}

/// 图解释器接口 (Graph Engine)
pub trait GraphEngine: Send + Sync {
    fn load(&self, registry: &NodeRegistry, json: &str) -> Result<GraphHandle, EngineError>;

    /// Starts a run of `graph` identified by `instance`. Returns the root scope.
    fn execute(
        &self,
        graph: GraphHandle,
        instance: Uuid,
        inputs: &HashMap<String, Value>,
        host: Arc<dyn EngineHost>,
    ) -> Result<ScopeId, EngineError>;

    /// Starts the branch downstream of `pin` on `node_id`, as a child of `scope`.
    fn trigger(
        &self,
        instance: Uuid,
        scope: ScopeId,
        node_id: &str,
        pin: &str,
    ) -> Result<ScopeId, EngineError>;

    /// Reports that the node running on `scope` has returned.
    fn finish_node(&self, instance: Uuid, scope: ScopeId) -> Result<(), EngineError>;

    /// Drops any per-run state once the root scope has completed.
    fn end_run(&self, _instance: Uuid) {}

    fn release(&self, graph: GraphHandle);
    fn inputs(&self, graph: GraphHandle) -> Vec<PinDecl>;
    fn outputs(&self, graph: GraphHandle) -> Vec<PinDecl>;
    fn version(&self, graph: GraphHandle) -> Option<String>;
}

/// A loaded graph. Releases its engine handle on drop.
pub struct GraphInstance {
    id: ResourceId,
    handle: GraphHandle,
    engine: Arc<dyn GraphEngine>,
    inputs: Vec<PinDecl>,
    outputs: Vec<PinDecl>,
}

impl GraphInstance {
    pub fn new(id: ResourceId, handle: GraphHandle, engine: Arc<dyn GraphEngine>) -> Self {
        let inputs = engine.inputs(handle);
        let outputs = engine.outputs(handle);
        Self {
            id,
            handle,
            engine,
            inputs,
            outputs,
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn handle(&self) -> GraphHandle {
        self.handle
    }

    pub fn engine(&self) -> &Arc<dyn GraphEngine> {
        &self.engine
    }

    pub fn inputs(&self) -> &[PinDecl] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PinDecl] {
        &self.outputs
    }

    pub fn version(&self) -> Option<String> {
        self.engine.version(self.handle)
    }
}

impl fmt::Debug for GraphInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphInstance")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("outputs", &self.outputs)
            .finish()
    }
}

impl Drop for GraphInstance {
    fn drop(&mut self) {
        self.engine.release(self.handle);
    }
}
