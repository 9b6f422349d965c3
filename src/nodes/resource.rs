//! Nodes that pull resources through the provider.
//!
//! Each reads the resource id from its `id` input, falling back to the `id`
//! param, writes the asset to an output pin and, when the `output` param is
//! set, also publishes it as that blueprint output. A failed resolve fails
//! the branch.

use crate::runtime::adapter::NodeContext;
use crate::runtime::node::Node;
use crate::runtime::value::Value;
use anyhow::{Context as AnyhowContext, Result, anyhow};
use async_trait::async_trait;

fn resource_id(ctx: &NodeContext) -> Result<String> {
    ctx.input_or_param("id")
        .filter(|id| !id.is_empty())
        .ok_or(anyhow!("Node '{}' has no resource id", ctx.node_id()))
}

fn validate_output(params: &serde_json::Value) -> Result<()> {
    match params.get("output") {
        None => Ok(()),
        Some(v) if v.as_str().is_some_and(|s| !s.is_empty()) => Ok(()),
        Some(_) => Err(anyhow!("'output' must be a non-empty string")),
    }
}

fn publish(ctx: &NodeContext, pin: &str, value: Value) {
    if let Some(output) = ctx.param_str("output") {
        ctx.set_blueprint_output(output, value.clone());
    }
    ctx.set_output(pin, value);
}

#[derive(Debug)]
pub struct LoadTextureNode;

#[async_trait]
impl Node for LoadTextureNode {
    fn kind(&self) -> &str {
        "load_texture"
    }

    fn validate(&self, params: &serde_json::Value) -> Result<()> {
        validate_output(params)
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<()> {
        let id = resource_id(ctx)?;
        let texture = ctx
            .provider()
            .resolve_texture(&id)
            .await
            .with_context(|| format!("Failed to load texture '{}'", id))?;
        publish(ctx, "texture", Value::Texture(texture));
        drop(ctx.trigger("then")?);
        Ok(())
    }
}

#[derive(Debug)]
pub struct LoadMeshNode;

#[async_trait]
impl Node for LoadMeshNode {
    fn kind(&self) -> &str {
        "load_mesh"
    }

    fn validate(&self, params: &serde_json::Value) -> Result<()> {
        validate_output(params)
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<()> {
        let id = resource_id(ctx)?;
        let mesh = ctx
            .provider()
            .resolve_mesh(&id)
            .await
            .with_context(|| format!("Failed to load mesh '{}'", id))?;
        publish(ctx, "mesh", Value::Mesh(mesh));
        drop(ctx.trigger("then")?);
        Ok(())
    }
}

#[derive(Debug)]
pub struct LoadJsonNode;

#[async_trait]
impl Node for LoadJsonNode {
    fn kind(&self) -> &str {
        "load_json"
    }

    fn validate(&self, params: &serde_json::Value) -> Result<()> {
        validate_output(params)
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<()> {
        let id = resource_id(ctx)?;
        let json: serde_json::Value = ctx
            .provider()
            .resolve_json(&id)
            .await
            .with_context(|| format!("Failed to load JSON '{}'", id))?;
        publish(ctx, "value", Value::from_json(json));
        drop(ctx.trigger("then")?);
        Ok(())
    }
}
