use crate::engine::{EngineHost, GraphInstance, NodeCall, ScopeId};
use crate::error::{EngineError, PinError};
use crate::provider::ArtifactProvider;
use crate::runtime::adapter;
use crate::runtime::node::{Node, NodeRegistry};
use crate::runtime::orchestrator::{ExecutionConfig, ExecutionResult};
use crate::runtime::scope::ScopeTracker;
use crate::runtime::value::{FromValue, Value};
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 运行时上下文 (Runtime Context)
/// State of one graph run: pending scopes, node pin bindings and the
/// blueprint outputs. One per root execution and one per nested
/// sub-graph invocation.
pub struct ExecutionContext {
    me: Weak<ExecutionContext>,
    instance_id: Uuid,
    graph: Arc<GraphInstance>,
    config: Arc<ExecutionConfig>,
    provider: Arc<ArtifactProvider>,
    runtime: Option<Handle>,
    scopes: ScopeTracker,
    inputs: OnceLock<HashMap<String, Value>>,
    // (node id, pin name) -> value
    bindings: DashMap<(String, String), Value>,
    outputs: DashMap<String, Value>,
    failed_branches: AtomicUsize,
    sync_queue: Mutex<SyncQueue>,
}

/// Sync node calls waiting on whichever caller is already running sync
/// nodes for this context.
#[derive(Default)]
struct SyncQueue {
    calls: VecDeque<(Arc<dyn Node>, NodeCall)>,
    draining: bool,
}

impl ExecutionContext {
    /// Creates a context for one run of `graph`. Node tasks are spawned on
    /// the tokio runtime current at construction.
    pub fn new(graph: Arc<GraphInstance>, config: Arc<ExecutionConfig>, provider: Arc<ArtifactProvider>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            instance_id: Uuid::new_v4(),
            graph,
            config,
            provider,
            runtime: Handle::try_current().ok(),
            scopes: ScopeTracker::new(),
            inputs: OnceLock::new(),
            bindings: DashMap::new(),
            outputs: DashMap::new(),
            failed_branches: AtomicUsize::new(0),
            sync_queue: Mutex::new(SyncQueue::default()),
        })
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn graph(&self) -> &Arc<GraphInstance> {
        &self.graph
    }

    pub fn config(&self) -> &Arc<ExecutionConfig> {
        &self.config
    }

    pub fn provider(&self) -> &Arc<ArtifactProvider> {
        &self.provider
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        self.provider.registry()
    }

    pub fn scopes(&self) -> &ScopeTracker {
        &self.scopes
    }

    // --- Execution ---

    /// Hands the graph to the engine. Inputs are fixed for the run's lifetime.
    pub fn start(self: &Arc<Self>, inputs: HashMap<String, Value>) -> Result<ScopeId, EngineError> {
        let inputs = self.inputs.get_or_init(|| inputs);
        let host: Arc<dyn EngineHost> = Arc::clone(self) as Arc<dyn EngineHost>;
        info!(instance_id = %self.instance_id, graph = %self.graph.id(), "Starting execution");
        self.graph
            .engine()
            .execute(self.graph.handle(), self.instance_id, inputs, host)
    }

    /// Starts the run and waits for the root scope to clear, then collects
    /// the graph's declared outputs.
    pub async fn run(self: &Arc<Self>, inputs: HashMap<String, Value>, timeout: Option<Duration>) -> ExecutionResult {
        if let Err(e) = self.start(inputs) {
            error!(instance_id = %self.instance_id, error = %e, "Engine refused to execute graph");
            self.graph.engine().end_run(self.instance_id);
            return ExecutionResult::failed(self.instance_id, e.to_string());
        }

        let finished = match timeout {
            None => {
                self.completed().await;
                true
            }
            Some(limit) => tokio::time::timeout(limit, self.completed()).await.is_ok(),
        };
        self.graph.engine().end_run(self.instance_id);

        if !finished {
            let pending = self.scopes.pending();
            warn!(instance_id = %self.instance_id, ?pending, "Execution timed out");
            return ExecutionResult::failed(
                self.instance_id,
                format!("root scope did not clear in time; pending scopes {pending:?}"),
            );
        }

        ExecutionResult {
            success: true,
            instance_id: self.instance_id,
            outputs: self.declared_outputs(),
            failed_branches: self.failed_branches(),
            error: None,
        }
    }

    pub async fn completed(&self) {
        self.scopes.wait_root().await;
    }

    pub fn is_complete(&self) -> bool {
        self.scopes.is_finished()
    }

    /// Runs `handler` once when the root scope completes. Panics inside it
    /// are logged and swallowed.
    pub fn on_complete(&self, handler: impl FnOnce(&ExecutionContext) + Send + 'static) {
        let me = self.me.clone();
        self.scopes.on_complete(Box::new(move || {
            if let Some(ctx) = me.upgrade() {
                handler(&ctx);
            }
        }));
    }

    pub fn trigger(&self, scope: ScopeId, node_id: &str, pin: &str) -> Result<ScopeId, EngineError> {
        self.graph.engine().trigger(self.instance_id, scope, node_id, pin)
    }

    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &self.runtime {
            Some(handle) => {
                handle.spawn(task);
            }
            None => error!(instance_id = %self.instance_id, "No async runtime to run node on"),
        }
    }

    fn sync_queue(&self) -> MutexGuard<'_, SyncQueue> {
        self.sync_queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a sync node call. Returns `true` when the caller has to drain
    /// the queue, `false` when a caller further up is already draining it.
    pub(crate) fn queue_sync(&self, node: Arc<dyn Node>, call: NodeCall) -> bool {
        let mut queue = self.sync_queue();
        queue.calls.push_back((node, call));
        !std::mem::replace(&mut queue.draining, true)
    }

    /// Next queued sync call. The drainer is released once the queue is empty.
    pub(crate) fn next_sync(&self) -> Option<(Arc<dyn Node>, NodeCall)> {
        let mut queue = self.sync_queue();
        let next = queue.calls.pop_front();
        if next.is_none() {
            queue.draining = false;
        }
        next
    }

    // --- Inputs / bindings ---

    pub fn input(&self, name: &str) -> Option<Value> {
        self.inputs.get().and_then(|inputs| inputs.get(name).cloned())
    }

    pub fn bind(&self, node_id: &str, pin: &str, value: Value) {
        self.bindings.insert((node_id.to_string(), pin.to_string()), value);
    }

    pub fn read(&self, node_id: &str, pin: &str) -> Option<Value> {
        self.bindings
            .get(&(node_id.to_string(), pin.to_string()))
            .map(|v| v.value().clone())
    }

    /// Typed pin read. Failures are local to the caller.
    pub fn try_read<T: FromValue>(&self, node_id: &str, pin: &str) -> Result<T, PinError> {
        let value = self.read(node_id, pin).ok_or_else(|| PinError::Unbound {
            node: node_id.to_string(),
            pin: pin.to_string(),
        })?;
        T::from_value(&value).ok_or_else(|| PinError::WrongType {
            node: node_id.to_string(),
            pin: pin.to_string(),
            expected: T::KIND,
            found: value.kind(),
        })
    }

    // --- Blueprint outputs ---

    pub fn set_blueprint_output(&self, name: &str, value: Value) {
        debug!(instance_id = %self.instance_id, output = name, kind = value.kind(), "Blueprint output set");
        self.outputs.insert(name.to_string(), value);
    }

    pub fn blueprint_output(&self, name: &str) -> Option<Value> {
        self.outputs.get(name).map(|v| v.value().clone())
    }

    pub fn blueprint_outputs(&self) -> HashMap<String, Value> {
        self.outputs
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Outputs the graph declares, skipping any that were never set.
    pub fn declared_outputs(&self) -> HashMap<String, Value> {
        self.graph
            .outputs()
            .iter()
            .filter_map(|decl| self.blueprint_output(&decl.name).map(|v| (decl.name.clone(), v)))
            .collect()
    }

    pub(crate) fn record_failure(&self) {
        self.failed_branches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed_branches(&self) -> usize {
        self.failed_branches.load(Ordering::Relaxed)
    }
}

impl EngineHost for ExecutionContext {
    fn scope_dispatched(&self, scope: ScopeId) {
        self.scopes.dispatch(scope);
    }

    fn scope_completed(&self, scope: ScopeId) {
        if self.scopes.complete(scope) {
            info!(instance_id = %self.instance_id, failed_branches = self.failed_branches(), "Execution complete");
        }
    }

    fn invoke_node(&self, call: NodeCall) {
        match self.me.upgrade() {
            Some(ctx) => adapter::dispatch(ctx, call),
            None => warn!(node = %call.node_id, "Node invoked after its execution was dropped"),
        }
    }

    fn bind_input(&self, node_id: &str, pin: &str, value: Value) {
        self.bind(node_id, pin, value);
    }

    fn read_output(&self, node_id: &str, pin: &str) -> Option<Value> {
        self.read(node_id, pin)
    }
}
