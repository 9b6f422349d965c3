use crate::engine::GraphInstance;
use crate::provider::ArtifactProvider;
use crate::runtime::context::ExecutionContext;
use crate::runtime::value::Value;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Host-side handle of the object a run attaches its results to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ParentHandle(pub u64);

/// A sub-graph loaded ahead of a run, with the inputs it executes with.
#[derive(Debug, Clone)]
pub struct LoadedGraph {
    pub graph: Arc<GraphInstance>,
    pub inputs: HashMap<String, Value>,
}

/// Everything a run needs before its first node executes.
#[derive(Debug, Default)]
pub struct ExecutionConfig {
    root_parent: ParentHandle,
    loaded: HashMap<String, LoadedGraph>,
}

impl ExecutionConfig {
    pub fn new(root_parent: ParentHandle) -> Self {
        Self {
            root_parent,
            loaded: HashMap::new(),
        }
    }

    pub fn with_loaded(mut self, id: impl Into<String>, graph: LoadedGraph) -> Self {
        self.loaded.insert(id.into(), graph);
        self
    }

    pub fn root_parent(&self) -> ParentHandle {
        self.root_parent
    }

    pub fn loaded(&self, id: &str) -> Option<&LoadedGraph> {
        self.loaded.get(id)
    }

    pub fn loaded_ids(&self) -> impl Iterator<Item = &str> {
        self.loaded.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct PreloadRequest {
    pub id: String,
    pub inputs: HashMap<String, Value>,
}

/// Caller-supplied description of a run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionData {
    pub root_parent: ParentHandle,
    pub preload: Vec<PreloadRequest>,
    /// Inputs for the root graph.
    pub inputs: HashMap<String, Value>,
}

impl ExecutionData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    pub fn with_preload(mut self, id: impl Into<String>, inputs: HashMap<String, Value>) -> Self {
        self.preload.push(PreloadRequest { id: id.into(), inputs });
        self
    }

    /// Resolves every preload request. A graph that fails to load is
    /// logged and left out; the run may still resolve it from the catalog.
    pub async fn materialize(&self, provider: &ArtifactProvider) -> ExecutionConfig {
        let mut config = ExecutionConfig::new(self.root_parent);
        for request in &self.preload {
            match provider.resolve_blueprint(&request.id).await {
                Ok(graph) => {
                    config.loaded.insert(
                        request.id.clone(),
                        LoadedGraph {
                            graph,
                            inputs: request.inputs.clone(),
                        },
                    );
                }
                Err(e) => warn!(id = %request.id, error = %e, "Skipping preloaded graph"),
            }
        }
        config
    }
}

/// 执行结果 (Execution Result)
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub instance_id: Uuid,
    /// The root graph's declared outputs that were set during the run.
    pub outputs: HashMap<String, Value>,
    /// Node branches that failed but still completed.
    pub failed_branches: usize,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn failed(instance_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            success: false,
            instance_id,
            outputs: HashMap::new(),
            failed_branches: 0,
            error: Some(error.into()),
        }
    }

    /// Outputs that have a JSON form, for printing.
    pub fn outputs_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.outputs
            .iter()
            .filter_map(|(name, value)| value.to_json().map(|json| (name.clone(), json)))
            .collect()
    }
}

/// 执行编排器 (Execution Orchestrator)
/// Resolves a root graph and drives one run of it to completion.
pub struct ExecutionOrchestrator {
    provider: Arc<ArtifactProvider>,
    timeout: Option<Duration>,
}

impl ExecutionOrchestrator {
    pub fn new(provider: Arc<ArtifactProvider>) -> Self {
        Self { provider, timeout: None }
    }

    /// Fails the run if the root scope has not cleared within `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn provider(&self) -> &Arc<ArtifactProvider> {
        &self.provider
    }

    pub async fn execute(&self, data: &ExecutionData, root_id: &str) -> ExecutionResult {
        let config = data.materialize(&self.provider).await;

        let (graph, mut inputs) = match config.loaded(root_id) {
            Some(loaded) => (Arc::clone(&loaded.graph), loaded.inputs.clone()),
            None => match self.provider.resolve_blueprint(root_id).await {
                Ok(graph) => (graph, HashMap::new()),
                Err(e) => {
                    error!(root = root_id, error = %e, "Failed to resolve root graph");
                    return ExecutionResult::failed(Uuid::nil(), format!("failed to resolve root graph '{root_id}': {e}"));
                }
            },
        };
        inputs.extend(data.inputs.iter().map(|(k, v)| (k.clone(), v.clone())));

        let ctx = ExecutionContext::new(graph, Arc::new(config), Arc::clone(&self.provider));
        info!(root = root_id, instance_id = %ctx.instance_id(), "Executing root graph");
        let result = ctx.run(inputs, self.timeout).await;
        info!(
            root = root_id,
            instance_id = %result.instance_id,
            success = result.success,
            outputs = result.outputs.len(),
            failed_branches = result.failed_branches,
            "Execution finished"
        );
        result
    }

    /// Callback form of [`execute`](Self::execute).
    pub async fn execute_then<F>(&self, data: &ExecutionData, root_id: &str, on_complete: F)
    where
        F: FnOnce(ExecutionResult),
    {
        on_complete(self.execute(data, root_id).await);
    }
}
