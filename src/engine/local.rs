//! In-process interpreter for JSON graphs.
//!
//! ```json
//! {
//!   "version": "1.0.0",
//!   "entry": "start",
//!   "inputs":  [{ "name": "skin", "type": "string" }],
//!   "outputs": [{ "name": "texture", "type": "texture" }],
//!   "nodes": [
//!     { "id": "start", "kind": "sequence", "links": { "then_0": "load", "then_1": null } },
//!     { "id": "load", "kind": "load_texture",
//!       "inputs": { "id": { "graph_input": "skin" } } }
//!   ]
//! }
//! ```
//!
//! Data inputs are literals, `{"link": [node, pin]}` reading another node's
//! output, or `{"graph_input": name}`. They are bound right before the node
//! runs. A scope completes once its node has finished and every scope
//! triggered from it has completed.

use crate::engine::{EngineHost, GraphEngine, GraphHandle, NodeCall, PinDecl, ROOT_SCOPE, ScopeId};
use crate::error::EngineError;
use crate::runtime::node::NodeRegistry;
use crate::runtime::value::Value;
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct GraphDocument {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    entry: Option<String>,
    #[serde(default)]
    inputs: Vec<PinDecl>,
    #[serde(default)]
    outputs: Vec<PinDecl>,
    #[serde(default)]
    nodes: Vec<NodeDocument>,
}

#[derive(Debug, Deserialize)]
struct NodeDocument {
    id: String,
    kind: String,
    #[serde(default)]
    params: serde_json::Value,
    #[serde(default)]
    inputs: HashMap<String, InputSource>,
    /// Exec output pin -> downstream node. `null` declares an unwired pin.
    #[serde(default)]
    links: HashMap<String, Option<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputSource {
    Link(LinkSource),
    GraphInput(GraphInputSource),
    Literal(serde_json::Value),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinkSource {
    link: (String, String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GraphInputSource {
    graph_input: String,
}

#[derive(Debug)]
struct LocalGraph {
    version: Option<String>,
    entry: Option<usize>,
    inputs: Vec<PinDecl>,
    outputs: Vec<PinDecl>,
    nodes: Vec<NodeDocument>,
    index: HashMap<String, usize>,
}

impl LocalGraph {
    fn node(&self, id: &str) -> Option<&NodeDocument> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }
}

#[derive(Debug)]
struct ScopeState {
    parent: Option<ScopeId>,
    node_finished: bool,
    open_children: usize,
}

#[derive(Debug, Default)]
struct RunState {
    next_scope: ScopeId,
    scopes: HashMap<ScopeId, ScopeState>,
}

struct Run {
    graph: Arc<LocalGraph>,
    host: Arc<dyn EngineHost>,
    inputs: HashMap<String, Value>,
    state: Mutex<RunState>,
}

impl Run {
    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pure-Rust [`GraphEngine`] for the JSON graph format above.
#[derive(Default)]
pub struct LocalEngine {
    next_handle: AtomicU64,
    graphs: DashMap<u64, Arc<LocalGraph>>,
    runs: DashMap<Uuid, Arc<Run>>,
}

impl LocalEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graphs currently loaded and not yet released.
    pub fn loaded_graphs(&self) -> usize {
        self.graphs.len()
    }

    pub fn active_runs(&self) -> usize {
        self.runs.len()
    }

    fn graph(&self, handle: GraphHandle) -> Result<Arc<LocalGraph>, EngineError> {
        self.graphs
            .get(&handle.0)
            .map(|g| Arc::clone(g.value()))
            .ok_or(EngineError::UnknownGraph(handle.0))
    }

    fn run(&self, instance: Uuid) -> Result<Arc<Run>, EngineError> {
        self.runs
            .get(&instance)
            .map(|r| Arc::clone(r.value()))
            .ok_or(EngineError::UnknownRun(instance))
    }

    /// Binds the node's data inputs and hands it to the host. No locks are
    /// held here; the host may re-enter the engine.
    fn start_node(&self, run: &Run, node: &NodeDocument, scope: ScopeId) {
        for (pin, source) in &node.inputs {
            let value = match source {
                InputSource::Literal(json) => Some(Value::from_json(json.clone())),
                InputSource::Link(LinkSource { link: (from, from_pin) }) => run.host.read_output(from, from_pin),
                InputSource::GraphInput(GraphInputSource { graph_input }) => run.inputs.get(graph_input).cloned(),
            };
            match value {
                Some(value) => run.host.bind_input(&node.id, pin, value),
                None => trace!(node = %node.id, pin, "Input source has no value yet"),
            }
        }

        run.host.invoke_node(NodeCall {
            scope,
            node_id: node.id.clone(),
            kind: node.kind.clone(),
            params: node.params.clone(),
        });
    }
}

fn validate(registry: &NodeRegistry, doc: &GraphDocument) -> Result<HashMap<String, usize>, EngineError> {
    let mut index = HashMap::new();
    for (i, node) in doc.nodes.iter().enumerate() {
        if index.insert(node.id.clone(), i).is_some() {
            return Err(EngineError::Load(format!("duplicate node id '{}'", node.id)));
        }
    }

    let ids: HashSet<&str> = index.keys().map(String::as_str).collect();
    for node in &doc.nodes {
        let implementation = registry
            .get(&node.kind)
            .ok_or_else(|| EngineError::Load(format!("node '{}' has unknown kind '{}'", node.id, node.kind)))?;
        implementation
            .validate(&node.params)
            .map_err(|e| EngineError::Load(format!("node '{}': {e:#}", node.id)))?;

        for (pin, target) in &node.links {
            if let Some(target) = target {
                if !ids.contains(target.as_str()) {
                    return Err(EngineError::Load(format!(
                        "node '{}' pin '{pin}' links to unknown node '{target}'",
                        node.id
                    )));
                }
            }
        }
        for (pin, source) in &node.inputs {
            match source {
                InputSource::Link(LinkSource { link: (from, _) }) if !ids.contains(from.as_str()) => {
                    return Err(EngineError::Load(format!(
                        "input '{pin}' of node '{}' reads unknown node '{from}'",
                        node.id
                    )));
                }
                InputSource::GraphInput(GraphInputSource { graph_input })
                    if !doc.inputs.iter().any(|decl| &decl.name == graph_input) =>
                {
                    return Err(EngineError::Load(format!(
                        "input '{pin}' of node '{}' reads undeclared graph input '{graph_input}'",
                        node.id
                    )));
                }
                _ => {}
            }
        }
    }

    if let Some(entry) = &doc.entry {
        if !ids.contains(entry.as_str()) {
            return Err(EngineError::Load(format!("entry node '{entry}' does not exist")));
        }
    }
    Ok(index)
}

impl GraphEngine for LocalEngine {
    fn load(&self, registry: &NodeRegistry, json: &str) -> Result<GraphHandle, EngineError> {
        let doc: GraphDocument = serde_json::from_str(json).map_err(|e| EngineError::Load(e.to_string()))?;
        let index = validate(registry, &doc)?;

        let entry = match &doc.entry {
            Some(id) => index.get(id).copied(),
            None if doc.nodes.is_empty() => None,
            None => Some(0),
        };
        let graph = LocalGraph {
            version: doc.version,
            entry,
            inputs: doc.inputs,
            outputs: doc.outputs,
            nodes: doc.nodes,
            index,
        };

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(handle, nodes = graph.nodes.len(), "Graph loaded");
        self.graphs.insert(handle, Arc::new(graph));
        Ok(GraphHandle(handle))
    }

    fn execute(
        &self,
        graph: GraphHandle,
        instance: Uuid,
        inputs: &HashMap<String, Value>,
        host: Arc<dyn EngineHost>,
    ) -> Result<ScopeId, EngineError> {
        let graph = self.graph(graph)?;
        let mut state = RunState {
            next_scope: ROOT_SCOPE + 1,
            ..Default::default()
        };
        state.scopes.insert(
            ROOT_SCOPE,
            ScopeState {
                parent: None,
                node_finished: false,
                open_children: 0,
            },
        );
        let run = Arc::new(Run {
            graph: Arc::clone(&graph),
            host,
            inputs: inputs.clone(),
            state: Mutex::new(state),
        });
        self.runs.insert(instance, Arc::clone(&run));

        run.host.scope_dispatched(ROOT_SCOPE);
        match graph.entry.map(|i| &graph.nodes[i]) {
            Some(entry) => self.start_node(&run, entry, ROOT_SCOPE),
            None => self.finish_node(instance, ROOT_SCOPE)?,
        }
        Ok(ROOT_SCOPE)
    }

    fn trigger(&self, instance: Uuid, scope: ScopeId, node_id: &str, pin: &str) -> Result<ScopeId, EngineError> {
        let run = self.run(instance)?;
        let node = run
            .graph
            .node(node_id)
            .ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;
        let target = node.links.get(pin).ok_or_else(|| EngineError::UnknownPin {
            node: node_id.to_string(),
            pin: pin.to_string(),
        })?;

        let child = {
            let mut state = run.state();
            let child = state.next_scope;
            state.next_scope += 1;
            if target.is_some() {
                let parent = match state.scopes.get_mut(&scope) {
                    Some(parent) => {
                        parent.open_children += 1;
                        Some(scope)
                    }
                    None => {
                        warn!(%instance, scope, node = node_id, "Trigger from a scope that already completed");
                        None
                    }
                };
                state.scopes.insert(
                    child,
                    ScopeState {
                        parent,
                        node_finished: false,
                        open_children: 0,
                    },
                );
            }
            child
        };

        run.host.scope_dispatched(child);
        match target.as_deref().and_then(|id| run.graph.node(id)) {
            Some(next) => self.start_node(&run, next, child),
            // Nothing downstream: the branch is over as soon as it starts.
            None => run.host.scope_completed(child),
        }
        Ok(child)
    }

    fn finish_node(&self, instance: Uuid, scope: ScopeId) -> Result<(), EngineError> {
        let run = self.run(instance)?;
        let completed = {
            let mut state = run.state();
            match state.scopes.get_mut(&scope) {
                Some(s) if !s.node_finished => s.node_finished = true,
                _ => return Err(EngineError::UnknownScope { instance, scope }),
            }

            let mut completed = Vec::new();
            let mut cursor = Some(scope);
            while let Some(id) = cursor {
                let done = state
                    .scopes
                    .get(&id)
                    .is_some_and(|s| s.node_finished && s.open_children == 0);
                if !done {
                    break;
                }
                let parent = state.scopes.remove(&id).and_then(|s| s.parent);
                completed.push(id);
                if let Some(parent) = parent {
                    if let Some(p) = state.scopes.get_mut(&parent) {
                        p.open_children -= 1;
                    }
                }
                cursor = parent;
            }
            completed
        };

        for id in completed {
            run.host.scope_completed(id);
        }
        Ok(())
    }

    fn end_run(&self, instance: Uuid) {
        if let Some((_, run)) = self.runs.remove(&instance) {
            let open = run.state().scopes.len();
            if open > 0 {
                debug!(%instance, open, "Run ended with scopes still open");
            }
        }
    }

    fn release(&self, graph: GraphHandle) {
        if self.graphs.remove(&graph.0).is_some() {
            debug!(handle = graph.0, "Graph released");
        }
    }

    fn inputs(&self, graph: GraphHandle) -> Vec<PinDecl> {
        self.graph(graph).map(|g| g.inputs.clone()).unwrap_or_default()
    }

    fn outputs(&self, graph: GraphHandle) -> Vec<PinDecl> {
        self.graph(graph).map(|g| g.outputs.clone()).unwrap_or_default()
    }

    fn version(&self, graph: GraphHandle) -> Option<String> {
        self.graph(graph).ok().and_then(|g| g.version.clone())
    }
}
