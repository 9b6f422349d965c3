use crate::runtime::adapter::NodeContext;
use crate::runtime::node::Node;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;

// --- SEQUENCE NODE ---

/// Fires its branches in order.
///
/// Params: `pins` (explicit pin names) or `count` (pins `then_0..then_N`),
/// and `join`. With `join: true` the node waits for every branch and then
/// continues through `completed`; otherwise it fires and returns.
#[derive(Debug)]
pub struct SequenceNode;

fn branch_pins(params: &Value) -> Result<Vec<String>> {
    if let Some(pins) = params.get("pins").and_then(|v| v.as_array()) {
        return pins
            .iter()
            .map(|p| p.as_str().map(str::to_string).ok_or(anyhow!("Pin names must be strings")))
            .collect();
    }
    let count = params
        .get("count")
        .and_then(|v| v.as_u64())
        .ok_or(anyhow!("Sequence needs 'pins' or 'count'"))?;
    Ok((0..count).map(|i| format!("then_{i}")).collect())
}

#[async_trait]
impl Node for SequenceNode {
    fn kind(&self) -> &str {
        "sequence"
    }

    fn validate(&self, params: &Value) -> Result<()> {
        branch_pins(params).map(|_| ())
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<()> {
        let pins = branch_pins(ctx.params())?;
        let join = ctx.params().get("join").and_then(|v| v.as_bool()).unwrap_or(false);

        let mut branches = Vec::with_capacity(pins.len());
        for pin in &pins {
            branches.push(ctx.trigger(pin)?);
        }

        if join {
            join_all(branches.into_iter().map(|b| b.wait())).await;
            drop(ctx.trigger("completed")?);
        }
        Ok(())
    }
}
