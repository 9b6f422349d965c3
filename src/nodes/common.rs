use crate::runtime::adapter::NodeContext;
use crate::runtime::node::{ExecutionMode, Node};
use crate::runtime::value::Value;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Writes its `message` input (or param) to the log and continues.
#[derive(Debug)]
pub struct LogNode;

#[async_trait]
impl Node for LogNode {
    fn kind(&self) -> &str {
        "log"
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Sync
    }

    fn validate(&self, params: &serde_json::Value) -> Result<()> {
        match params.get("level").and_then(|v| v.as_str()) {
            None | Some("debug" | "info" | "warn") => Ok(()),
            Some(other) => Err(anyhow!("Unknown log level '{}'", other)),
        }
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<()> {
        let message = match ctx.input::<Value>("message") {
            Ok(value) => match value {
                Value::String(s) => s,
                other => other
                    .to_json()
                    .map(|j| j.to_string())
                    .unwrap_or_else(|| format!("<{}>", other.kind())),
            },
            Err(_) => ctx.param_str("message").unwrap_or_default().to_string(),
        };

        match ctx.param_str("level") {
            Some("debug") => debug!(node = ctx.node_id(), "{}", message),
            Some("warn") => warn!(node = ctx.node_id(), "{}", message),
            _ => info!(node = ctx.node_id(), "{}", message),
        }

        drop(ctx.trigger("then")?);
        Ok(())
    }
}

/// Publishes its `value` input as the blueprint output named by `name`.
///
/// Falls back to the `value` param when the input pin is unbound.
#[derive(Debug)]
pub struct SetOutputNode;

#[async_trait]
impl Node for SetOutputNode {
    fn kind(&self) -> &str {
        "set_output"
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Sync
    }

    fn validate(&self, params: &serde_json::Value) -> Result<()> {
        params
            .get("name")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|_| ())
            .ok_or(anyhow!("Missing output name"))
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<()> {
        let name = ctx.param_str("name").ok_or(anyhow!("Missing output name"))?;
        let value = match ctx.input::<Value>("value") {
            Ok(value) => value,
            Err(_) => ctx
                .params()
                .get("value")
                .cloned()
                .map(Value::from_json)
                .ok_or(anyhow!("Nothing to publish as '{}'", name))?,
        };
        ctx.set_blueprint_output(name, value);
        drop(ctx.trigger("then")?);
        Ok(())
    }
}
