use crate::engine::{NodeCall, ScopeId};
use crate::error::{EngineError, PinError};
use crate::provider::ArtifactProvider;
use crate::runtime::context::ExecutionContext;
use crate::runtime::node::{ExecutionMode, Node};
use crate::runtime::scope::panic_message;
use crate::runtime::value::{FromValue, Value};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tracing::{debug, error, warn};

/// What a node sees of its run while it executes.
pub struct NodeContext {
    ctx: Arc<ExecutionContext>,
    call: NodeCall,
}

/// A branch started by [`NodeContext::trigger`].
#[must_use = "drop to fire-and-continue, or await `wait` to join"]
pub struct Triggered {
    ctx: Arc<ExecutionContext>,
    scope: ScopeId,
}

impl Triggered {
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Waits until the downstream branch has completed.
    pub async fn wait(self) {
        self.ctx.scopes().wait_scope(self.scope).await;
    }
}

impl NodeContext {
    pub fn new(ctx: Arc<ExecutionContext>, call: NodeCall) -> Self {
        Self { ctx, call }
    }

    pub fn node_id(&self) -> &str {
        &self.call.node_id
    }

    pub fn kind(&self) -> &str {
        &self.call.kind
    }

    pub fn scope(&self) -> ScopeId {
        self.call.scope
    }

    pub fn params(&self) -> &serde_json::Value {
        &self.call.params
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.call.params.get(name).and_then(|v| v.as_str())
    }

    pub fn execution(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    pub fn provider(&self) -> &Arc<ArtifactProvider> {
        self.ctx.provider()
    }

    pub fn input<T: FromValue>(&self, pin: &str) -> Result<T, PinError> {
        self.ctx.try_read(&self.call.node_id, pin)
    }

    pub fn input_or<T: FromValue>(&self, pin: &str, default: T) -> T {
        self.input(pin).unwrap_or(default)
    }

    /// String input pin, falling back to the param of the same name.
    pub fn input_or_param(&self, name: &str) -> Option<String> {
        self.input::<String>(name)
            .ok()
            .or_else(|| self.param_str(name).map(str::to_string))
    }

    pub fn set_output(&self, pin: &str, value: impl Into<Value>) {
        self.ctx.bind(&self.call.node_id, pin, value.into());
    }

    pub fn set_blueprint_output(&self, name: &str, value: impl Into<Value>) {
        self.ctx.set_blueprint_output(name, value.into());
    }

    /// Starts the branch wired to `pin`. A missing pin is an authoring error.
    pub fn trigger(&self, pin: &str) -> Result<Triggered, EngineError> {
        let scope = self.ctx.trigger(self.call.scope, &self.call.node_id, pin)?;
        debug!(node = %self.call.node_id, pin, scope, "Triggered");
        Ok(Triggered {
            ctx: Arc::clone(&self.ctx),
            scope,
        })
    }

    pub async fn trigger_and_wait(&self, pin: &str) -> Result<(), EngineError> {
        self.trigger(pin)?.wait().await;
        Ok(())
    }
}

/// Runs the node the engine asked for and reports its return to the engine.
///
/// Sync nodes are polled once in place, one after another; async nodes
/// are spawned. Errors and
/// panics fail only this branch.
pub(crate) fn dispatch(ctx: Arc<ExecutionContext>, call: NodeCall) {
    let Some(node) = ctx.registry().get(&call.kind).cloned() else {
        error!(node = %call.node_id, kind = %call.kind, "No implementation for node kind");
        ctx.record_failure();
        finish(&ctx, call.scope);
        return;
    };

    match node.execution_mode() {
        ExecutionMode::Async => {
            let task = run_node(node, NodeContext::new(Arc::clone(&ctx), call));
            ctx.spawn(task);
        }
        // A sync node triggered from inside another one is queued rather
        // than run on top of it, so long chains do not grow the stack.
        ExecutionMode::Sync => {
            if ctx.queue_sync(node, call) {
                while let Some((node, call)) = ctx.next_sync() {
                    run_inline(&ctx, node, call);
                }
            }
        }
    }
}

fn run_inline(ctx: &Arc<ExecutionContext>, node: Arc<dyn Node>, call: NodeCall) {
    let mut task = Box::pin(run_node(node, NodeContext::new(Arc::clone(ctx), call)));
    let waker = futures::task::noop_waker();
    let mut cx = TaskContext::from_waker(&waker);
    if let Poll::Pending = task.as_mut().poll(&mut cx) {
        warn!("Sync node suspended, finishing it on a task");
        ctx.spawn(task);
    }
}

async fn run_node(node: Arc<dyn Node>, node_ctx: NodeContext) {
    let outcome = AssertUnwindSafe(node.execute(&node_ctx)).catch_unwind().await;
    let ctx = &node_ctx.ctx;
    let call = &node_ctx.call;

    match outcome {
        Ok(Ok(())) => debug!(node = %call.node_id, kind = %call.kind, scope = call.scope, "Node finished"),
        Ok(Err(e)) => {
            warn!(node = %call.node_id, kind = %call.kind, scope = call.scope, error = ?e, "Node failed, abandoning branch");
            ctx.record_failure();
        }
        Err(panic) => {
            error!(node = %call.node_id, kind = %call.kind, panic = %panic_message(&*panic), "Node panicked");
            ctx.record_failure();
        }
    }

    finish(ctx, call.scope);
}

fn finish(ctx: &ExecutionContext, scope: ScopeId) {
    if let Err(e) = ctx.graph().engine().finish_node(ctx.instance_id(), scope) {
        error!(instance_id = %ctx.instance_id(), scope, error = %e, "Engine rejected node completion");
    }
}
