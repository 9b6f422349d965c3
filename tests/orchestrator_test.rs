mod common;

use anyhow::Result;
use async_trait::async_trait;
use common::{Fixture, gltf_bytes, png_bytes};
use serde_json::json;
use skein::error::PinError;
use skein::runtime::{
    ExecutionConfig, ExecutionContext, ExecutionData, ExecutionMode, ExecutionOrchestrator, Node, NodeContext,
    NodeRegistry, Value,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn echo_graph() -> serde_json::Value {
    json!({
        "version": "1.0.0",
        "entry": "publish",
        "inputs": [{ "name": "skin", "type": "string" }],
        "outputs": [{ "name": "result", "type": "string" }],
        "nodes": [
            { "id": "publish", "kind": "set_output", "params": { "name": "result" },
              "inputs": { "value": { "graph_input": "skin" } }, "links": { "then": null } }
        ]
    })
}

#[tokio::test]
async fn test_unknown_root_never_reaches_engine() {
    let fixture = Fixture::new();
    let orchestrator = ExecutionOrchestrator::new(fixture.provider.clone());

    let result = orchestrator.execute(&ExecutionData::new(), "missing-root").await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("missing-root"));
    assert_eq!(fixture.engine.loads(), 0);
    assert_eq!(fixture.engine.executes(), 0);
}

#[tokio::test]
async fn test_outputs_from_inputs() {
    let fixture = Fixture::new();
    fixture.add_graph("avatar", echo_graph());
    let orchestrator = ExecutionOrchestrator::new(fixture.provider.clone());

    let data = ExecutionData::new().with_input("skin", "red");
    let result = orchestrator.execute(&data, "avatar").await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.outputs.get("result"), Some(&Value::from("red")));
    assert_eq!(result.failed_branches, 0);
    assert_eq!(fixture.engine.executes(), 1);
    // The run is gone and the graph released once the result is out.
    assert_eq!(fixture.engine.inner().active_runs(), 0);
    assert_eq!(fixture.engine.inner().loaded_graphs(), 0);
}

#[tokio::test]
async fn test_execute_then_delivers_result() {
    let fixture = Fixture::new();
    fixture.add_graph("avatar", echo_graph());
    let orchestrator = ExecutionOrchestrator::new(fixture.provider.clone());

    let mut delivered = None;
    orchestrator
        .execute_then(&ExecutionData::new().with_input("skin", "blue"), "avatar", |r| delivered = Some(r))
        .await;

    let result = delivered.unwrap();
    assert!(result.success);
    assert_eq!(result.outputs_json().get("result"), Some(&json!("blue")));
}

#[tokio::test]
async fn test_sequence_join_runs_every_branch() {
    let fixture = Fixture::new();
    fixture.add_graph(
        "seq",
        json!({
            "version": "1.2.0",
            "entry": "start",
            "outputs": [{ "name": "first" }, { "name": "second" }, { "name": "joined" }],
            "nodes": [
                { "id": "start", "kind": "sequence", "params": { "count": 2, "join": true },
                  "links": { "then_0": "a", "then_1": "b", "completed": "done" } },
                { "id": "a", "kind": "set_output", "params": { "name": "first", "value": "A" }, "links": { "then": null } },
                { "id": "b", "kind": "set_output", "params": { "name": "second", "value": 2 }, "links": { "then": null } },
                { "id": "done", "kind": "set_output", "params": { "name": "joined", "value": true }, "links": { "then": null } }
            ]
        }),
    );

    let result = ExecutionOrchestrator::new(fixture.provider.clone())
        .execute(&ExecutionData::new(), "seq")
        .await;

    assert!(result.success);
    assert_eq!(result.outputs.len(), 3);
    assert_eq!(result.outputs["first"], Value::from("A"));
    assert_eq!(result.outputs["second"], Value::Int(2));
    assert_eq!(result.outputs["joined"], Value::Bool(true));
}

#[tokio::test]
async fn test_failed_branch_gives_partial_result() {
    let fixture = Fixture::new();
    fixture.add("skin", "texture", png_bytes(2, 2));
    fixture.add(
        "body",
        "mesh",
        gltf_bytes(&["Torso", "Legs"]),
    );
    fixture.add("palette", "json", r##"{ "primary": "#c80a0a" }"##);
    fixture.add_graph(
        "avatar",
        json!({
            "version": "1.0.0",
            "entry": "start",
            "outputs": [{ "name": "texture" }, { "name": "mesh" }, { "name": "hat" }, { "name": "palette" }],
            "nodes": [
                { "id": "start", "kind": "sequence", "params": { "count": 4 },
                  "links": { "then_0": "skin", "then_1": "hat", "then_2": "body", "then_3": "palette" } },
                { "id": "skin", "kind": "load_texture", "params": { "id": "skin", "output": "texture" }, "links": { "then": null } },
                { "id": "hat", "kind": "load_texture", "params": { "id": "no-such-hat", "output": "hat" }, "links": { "then": null } },
                { "id": "body", "kind": "load_mesh", "params": { "id": "body", "output": "mesh" }, "links": { "then": null } },
                { "id": "palette", "kind": "load_json", "params": { "id": "palette", "output": "palette" }, "links": { "then": null } }
            ]
        }),
    );

    let result = ExecutionOrchestrator::new(fixture.provider.clone())
        .execute(&ExecutionData::new(), "avatar")
        .await;

    assert!(result.success, "the root still clears when one branch fails");
    assert_eq!(result.failed_branches, 1);
    assert!(!result.outputs.contains_key("hat"));

    match &result.outputs["texture"] {
        Value::Texture(texture) => assert_eq!((texture.width, texture.height), (2, 2)),
        other => panic!("expected a texture, got {other:?}"),
    }
    match &result.outputs["mesh"] {
        Value::Mesh(mesh) => {
            assert_eq!(mesh.mesh_name.as_deref(), Some("Torso"));
            assert_eq!(mesh.mesh_count, 2);
        }
        other => panic!("expected a mesh, got {other:?}"),
    }
    assert_eq!(result.outputs_json().get("palette"), Some(&json!({ "primary": "#c80a0a" })));
}

#[tokio::test]
async fn test_missing_exec_pin_fails_only_its_branch() {
    let fixture = Fixture::new();
    fixture.add_graph(
        "g",
        json!({
            "version": "1.0.0",
            "entry": "start",
            "outputs": [{ "name": "ok" }],
            "nodes": [
                { "id": "start", "kind": "sequence", "params": { "count": 2 },
                  "links": { "then_0": "broken", "then_1": "fine" } },
                // No `then` pin declared: triggering it is an authoring error.
                { "id": "broken", "kind": "log", "params": { "message": "hello" } },
                { "id": "fine", "kind": "set_output", "params": { "name": "ok", "value": 1 }, "links": { "then": null } }
            ]
        }),
    );

    let result = ExecutionOrchestrator::new(fixture.provider.clone())
        .execute(&ExecutionData::new(), "g")
        .await;

    assert!(result.success);
    assert_eq!(result.failed_branches, 1);
    assert_eq!(result.outputs["ok"], Value::Int(1));
}

#[tokio::test]
async fn test_unsupported_version_is_rejected_before_load() {
    let fixture = Fixture::new();
    let mut graph = echo_graph();
    graph["version"] = json!("2.0.0");
    fixture.add_graph("future", graph);
    let mut unversioned = echo_graph();
    unversioned.as_object_mut().unwrap().remove("version");
    fixture.add_graph("unversioned", unversioned);

    let orchestrator = ExecutionOrchestrator::new(fixture.provider.clone());
    let future = orchestrator.execute(&ExecutionData::new(), "future").await;
    let unversioned = orchestrator.execute(&ExecutionData::new(), "unversioned").await;

    assert!(!future.success);
    assert!(future.error.unwrap().contains("2.0.0"));
    assert!(!unversioned.success);
    assert_eq!(fixture.engine.loads(), 0);
    assert_eq!(fixture.engine.executes(), 0);
}

#[tokio::test]
async fn test_preloaded_root_uses_its_inputs() {
    let fixture = Fixture::new();
    fixture.add_graph("avatar", echo_graph());
    let orchestrator = ExecutionOrchestrator::new(fixture.provider.clone());

    let data = ExecutionData::new()
        .with_preload("avatar", HashMap::from([("skin".to_string(), Value::from("green"))]))
        .with_preload("ghost", HashMap::new());
    let result = orchestrator.execute(&data, "avatar").await;

    assert!(result.success);
    assert_eq!(result.outputs["result"], Value::from("green"));
    // Loaded once during preload, not again for the root.
    assert_eq!(fixture.engine.loads(), 1);

    let config = data.materialize(&fixture.provider).await;
    assert!(config.loaded("avatar").is_some());
    assert!(config.loaded("ghost").is_none());
}

#[tokio::test]
async fn test_nested_blueprint_outputs_flow_back() {
    let fixture = Fixture::new();
    fixture.add_graph("child", echo_graph());
    fixture.add_graph(
        "parent",
        json!({
            "version": "1.0.0",
            "entry": "sub",
            "inputs": [{ "name": "skin" }],
            "outputs": [{ "name": "from_child" }],
            "nodes": [
                { "id": "sub", "kind": "execute_blueprint", "params": { "id": "child" },
                  "inputs": { "skin": { "graph_input": "skin" } }, "links": { "then": "publish" } },
                { "id": "publish", "kind": "set_output", "params": { "name": "from_child" },
                  "inputs": { "value": { "link": ["sub", "result"] } }, "links": { "then": null } }
            ]
        }),
    );

    let result = ExecutionOrchestrator::new(fixture.provider.clone())
        .execute(&ExecutionData::new().with_input("skin", "purple"), "parent")
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.outputs["from_child"], Value::from("purple"));
    assert_eq!(fixture.engine.executes(), 2);
}

// --- Custom nodes ---

#[derive(Debug)]
struct StallNode;

#[async_trait]
impl Node for StallNode {
    fn kind(&self) -> &str {
        "stall"
    }

    async fn execute(&self, _ctx: &NodeContext) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

#[derive(Debug)]
struct PanicNode;

#[async_trait]
impl Node for PanicNode {
    fn kind(&self) -> &str {
        "panic"
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Sync
    }

    async fn execute(&self, _ctx: &NodeContext) -> Result<()> {
        panic!("node exploded");
    }
}

/// Reads `amount` as an int, falling back to 10.
#[derive(Debug)]
struct DoubleNode;

#[async_trait]
impl Node for DoubleNode {
    fn kind(&self) -> &str {
        "double"
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<()> {
        let amount: i64 = ctx.input_or("amount", 10);
        ctx.set_blueprint_output("doubled", Value::Int(amount * 2));
        if let Err(PinError::WrongType { found, .. }) = ctx.input::<i64>("amount") {
            ctx.set_blueprint_output("wrong_type", Value::from(found));
        }
        ctx.trigger_and_wait("then").await?;
        Ok(())
    }
}

fn custom_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::with_builtins();
    registry.register(Arc::new(StallNode));
    registry.register(Arc::new(PanicNode));
    registry.register(Arc::new(DoubleNode));
    registry
}

#[tokio::test]
async fn test_execution_timeout_reports_pending_scopes() {
    let fixture = Fixture::with_registry(custom_registry());
    fixture.add_graph(
        "slow",
        json!({ "version": "1.0.0", "nodes": [ { "id": "wait", "kind": "stall" } ] }),
    );

    let result = ExecutionOrchestrator::new(fixture.provider.clone())
        .with_timeout(Some(Duration::from_millis(100)))
        .execute(&ExecutionData::new(), "slow")
        .await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("pending"));
    assert_eq!(fixture.engine.inner().active_runs(), 0);
}

#[tokio::test]
async fn test_panicking_node_fails_its_branch() {
    let fixture = Fixture::with_registry(custom_registry());
    fixture.add_graph(
        "boom",
        json!({ "version": "1.0.0", "nodes": [ { "id": "p", "kind": "panic" } ] }),
    );

    let result = ExecutionOrchestrator::new(fixture.provider.clone())
        .execute(&ExecutionData::new(), "boom")
        .await;

    assert!(result.success);
    assert_eq!(result.failed_branches, 1);
}

#[tokio::test]
async fn test_typed_pin_reads_are_local() {
    let fixture = Fixture::with_registry(custom_registry());
    fixture.add_graph(
        "calc",
        json!({
            "version": "1.0.0",
            "entry": "d",
            "outputs": [{ "name": "doubled" }, { "name": "wrong_type" }, { "name": "after" }],
            "nodes": [
                { "id": "d", "kind": "double", "inputs": { "amount": "seven" }, "links": { "then": "after" } },
                { "id": "after", "kind": "set_output", "params": { "name": "after", "value": "ran" }, "links": { "then": null } }
            ]
        }),
    );

    let result = ExecutionOrchestrator::new(fixture.provider.clone())
        .execute(&ExecutionData::new(), "calc")
        .await;

    assert!(result.success);
    assert_eq!(result.outputs["doubled"], Value::Int(20));
    assert_eq!(result.outputs["wrong_type"], Value::from("string"));
    assert_eq!(result.outputs["after"], Value::from("ran"));
}

#[tokio::test]
async fn test_context_completion_handler_and_bindings() {
    let fixture = Fixture::new();
    fixture.add_graph("avatar", echo_graph());
    let graph = fixture.provider.resolve_blueprint("avatar").await.unwrap();

    let ctx = ExecutionContext::new(graph, Arc::new(ExecutionConfig::default()), fixture.provider.clone());
    let fired = Arc::new(AtomicUsize::new(0));
    let seen = fired.clone();
    ctx.on_complete(move |done| {
        assert!(done.blueprint_output("result").is_some());
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let inputs = HashMap::from([("skin".to_string(), Value::from("teal"))]);
    let result = ctx.run(inputs, None).await;

    assert!(result.success);
    assert!(ctx.is_complete());
    // The context owns the run's identity and hands it to the engine.
    assert_eq!(result.instance_id, ctx.instance_id());
    assert_eq!(fixture.engine.instances(), vec![ctx.instance_id()]);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.input("skin"), Some(Value::from("teal")));
    assert_eq!(ctx.read("publish", "value"), Some(Value::from("teal")));

    ctx.bind("n", "p", Value::Int(3));
    assert_eq!(ctx.try_read::<i64>("n", "p"), Ok(3));
    assert_eq!(
        ctx.try_read::<String>("n", "p"),
        Err(PinError::WrongType {
            node: "n".to_string(),
            pin: "p".to_string(),
            expected: "string",
            found: "int",
        })
    );
    assert!(matches!(ctx.try_read::<i64>("n", "missing"), Err(PinError::Unbound { .. })));
}

#[tokio::test]
async fn test_long_sync_chain_runs_to_completion() {
    const LENGTH: usize = 10_000;

    let mut nodes: Vec<serde_json::Value> = (0..LENGTH)
        .map(|i| {
            let next = if i + 1 == LENGTH { "publish".to_string() } else { format!("n{}", i + 1) };
            json!({ "id": format!("n{i}"), "kind": "log",
                    "params": { "message": "step", "level": "debug" }, "links": { "then": next } })
        })
        .collect();
    nodes.push(json!({ "id": "publish", "kind": "set_output",
                       "params": { "name": "done", "value": true }, "links": { "then": null } }));

    let fixture = Fixture::new();
    fixture.add_graph(
        "chain",
        json!({ "version": "1.0.0", "entry": "n0", "outputs": [{ "name": "done" }], "nodes": nodes }),
    );
    let orchestrator = ExecutionOrchestrator::new(fixture.provider.clone());

    let result = orchestrator.execute(&ExecutionData::new(), "chain").await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.failed_branches, 0);
    assert_eq!(result.outputs.get("done"), Some(&Value::Bool(true)));
    assert_eq!(fixture.engine.inner().active_runs(), 0);
}
