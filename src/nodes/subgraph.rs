use crate::runtime::adapter::NodeContext;
use crate::runtime::context::ExecutionContext;
use crate::runtime::node::Node;
use crate::runtime::value::Value;
use anyhow::{Context as AnyhowContext, Result, anyhow, bail};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs another blueprint to completion on a child execution context.
///
/// The graph is looked up among the run's preloaded graphs first, then
/// resolved through the provider. Each input the child declares is fed from
/// this node's input pin of the same name, over any preloaded inputs. The
/// child's outputs become this node's output pins.
#[derive(Debug)]
pub struct ExecuteBlueprintNode;

#[async_trait]
impl Node for ExecuteBlueprintNode {
    fn kind(&self) -> &str {
        "execute_blueprint"
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<()> {
        let id = ctx
            .input_or_param("id")
            .filter(|id| !id.is_empty())
            .ok_or(anyhow!("Node '{}' has no blueprint id", ctx.node_id()))?;
        let parent = ctx.execution();

        let (graph, mut inputs) = match parent.config().loaded(&id) {
            Some(loaded) => (Arc::clone(&loaded.graph), loaded.inputs.clone()),
            None => {
                let graph = ctx
                    .provider()
                    .resolve_blueprint(&id)
                    .await
                    .with_context(|| format!("Failed to load blueprint '{}'", id))?;
                (graph, Default::default())
            }
        };
        for decl in graph.inputs() {
            if let Ok(value) = ctx.input::<Value>(&decl.name) {
                inputs.insert(decl.name.clone(), value);
            }
        }

        let child = ExecutionContext::new(graph, Arc::clone(parent.config()), Arc::clone(parent.provider()));
        debug!(parent = %parent.instance_id(), child = %child.instance_id(), blueprint = %id, "Running nested blueprint");
        let result = child.run(inputs, None).await;
        if !result.success {
            bail!(
                "Blueprint '{}' did not complete: {}",
                id,
                result.error.unwrap_or_default()
            );
        }
        if result.failed_branches > 0 {
            warn!(blueprint = %id, failed_branches = result.failed_branches, "Nested blueprint completed partially");
        }

        for (name, value) in result.outputs {
            ctx.set_output(&name, value);
        }
        drop(ctx.trigger("then")?);
        Ok(())
    }
}
