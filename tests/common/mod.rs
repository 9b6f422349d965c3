#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use skein::download::Downloader;
use skein::engine::{EngineHost, GraphEngine, GraphHandle, LocalEngine, PinDecl, ScopeId};
use skein::error::{EngineError, ResolveError};
use skein::provider::ArtifactProvider;
use skein::resource::{Catalog, ResourceDescriptor, ResourceId, ResourceType};
use skein::runtime::{NodeRegistry, Value};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

// --- Downloader ---

/// Serves blobs from memory and counts every download.
#[derive(Debug, Default)]
pub struct CountingDownloader {
    name: String,
    scheme: Option<String>,
    blobs: DashMap<String, Vec<u8>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl CountingDownloader {
    /// Accepts every URI.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Accepts only URIs of `scheme`.
    pub fn for_scheme(name: &str, scheme: &str) -> Self {
        Self {
            name: name.to_string(),
            scheme: Some(scheme.to_string()),
            ..Default::default()
        }
    }

    pub fn with_blob(self, uri: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.add_blob(uri, bytes);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn add_blob(&self, uri: &str, bytes: impl Into<Vec<u8>>) {
        self.blobs.insert(uri.to_string(), bytes.into());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for CountingDownloader {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_download(&self, descriptor: &ResourceDescriptor) -> bool {
        match &self.scheme {
            Some(scheme) => descriptor.uri().starts_with(&format!("{scheme}:")),
            None => true,
        }
    }

    async fn download(&self, descriptor: &ResourceDescriptor) -> Result<Vec<u8>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.blobs
            .get(descriptor.uri())
            .map(|b| b.value().clone())
            .ok_or_else(|| ResolveError::HttpStatus {
                uri: descriptor.uri().to_string(),
                status: 404,
            })
    }
}

// --- Engine ---

/// [`LocalEngine`] that counts loads and executions.
#[derive(Default)]
pub struct CountingEngine {
    inner: LocalEngine,
    loads: AtomicUsize,
    executes: AtomicUsize,
    instances: Mutex<Vec<Uuid>>,
}

impl CountingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn executes(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }

    /// Instance ids passed to `execute`, in call order.
    pub fn instances(&self) -> Vec<Uuid> {
        self.instances.lock().unwrap().clone()
    }

    pub fn inner(&self) -> &LocalEngine {
        &self.inner
    }
}

impl GraphEngine for CountingEngine {
    fn load(&self, registry: &NodeRegistry, json: &str) -> Result<GraphHandle, EngineError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(registry, json)
    }

    fn execute(
        &self,
        graph: GraphHandle,
        instance: Uuid,
        inputs: &HashMap<String, Value>,
        host: Arc<dyn EngineHost>,
    ) -> Result<ScopeId, EngineError> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        self.instances.lock().unwrap().push(instance);
        self.inner.execute(graph, instance, inputs, host)
    }

    fn trigger(&self, instance: Uuid, scope: ScopeId, node_id: &str, pin: &str) -> Result<ScopeId, EngineError> {
        self.inner.trigger(instance, scope, node_id, pin)
    }

    fn finish_node(&self, instance: Uuid, scope: ScopeId) -> Result<(), EngineError> {
        self.inner.finish_node(instance, scope)
    }

    fn end_run(&self, instance: Uuid) {
        self.inner.end_run(instance)
    }

    fn release(&self, graph: GraphHandle) {
        self.inner.release(graph)
    }

    fn inputs(&self, graph: GraphHandle) -> Vec<PinDecl> {
        self.inner.inputs(graph)
    }

    fn outputs(&self, graph: GraphHandle) -> Vec<PinDecl> {
        self.inner.outputs(graph)
    }

    fn version(&self, graph: GraphHandle) -> Option<String> {
        self.inner.version(graph)
    }
}

// --- Host ---

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Dispatched(ScopeId),
    Completed(ScopeId),
    Invoked { scope: ScopeId, node: String },
}

/// Records engine callbacks without running anything.
#[derive(Default)]
pub struct RecordingHost {
    pub events: Mutex<Vec<HostEvent>>,
    pub bindings: DashMap<(String, String), Value>,
}

impl RecordingHost {
    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<ScopeId> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HostEvent::Completed(scope) => Some(scope),
                _ => None,
            })
            .collect()
    }

    /// Scope each node was invoked on.
    pub fn invoked(&self) -> Vec<(String, ScopeId)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HostEvent::Invoked { scope, node } => Some((node, scope)),
                _ => None,
            })
            .collect()
    }
}

impl EngineHost for RecordingHost {
    fn scope_dispatched(&self, scope: ScopeId) {
        self.events.lock().unwrap().push(HostEvent::Dispatched(scope));
    }

    fn scope_completed(&self, scope: ScopeId) {
        self.events.lock().unwrap().push(HostEvent::Completed(scope));
    }

    fn invoke_node(&self, call: skein::engine::NodeCall) {
        self.events.lock().unwrap().push(HostEvent::Invoked {
            scope: call.scope,
            node: call.node_id,
        });
    }

    fn bind_input(&self, node_id: &str, pin: &str, value: Value) {
        self.bindings.insert((node_id.to_string(), pin.to_string()), value);
    }

    fn read_output(&self, node_id: &str, pin: &str) -> Option<Value> {
        self.bindings
            .get(&(node_id.to_string(), pin.to_string()))
            .map(|v| v.value().clone())
    }
}

// --- Fixture ---

/// Provider over a counting engine, serving `mem://<id>` resources.
pub struct Fixture {
    pub provider: Arc<ArtifactProvider>,
    pub engine: Arc<CountingEngine>,
    pub downloader: Arc<CountingDownloader>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_registry(NodeRegistry::with_builtins())
    }

    pub fn with_registry(registry: NodeRegistry) -> Self {
        let engine = Arc::new(CountingEngine::new());
        let downloader = Arc::new(CountingDownloader::for_scheme("memory", "mem"));
        let provider = ArtifactProvider::new(engine.clone(), Arc::new(registry));
        provider.register_downloader(downloader.clone());
        Self {
            provider: Arc::new(provider),
            engine,
            downloader,
        }
    }

    pub fn add(&self, id: &str, kind: &str, bytes: impl Into<Vec<u8>>) {
        let uri = format!("mem://{id}");
        self.downloader.add_blob(&uri, bytes);
        let mut catalog = Catalog::default();
        catalog.register(ResourceDescriptor::new(
            ResourceId::new(id).unwrap(),
            uri,
            ResourceType::from(kind),
        ));
        self.provider.register_catalog(catalog);
    }

    pub fn add_graph(&self, id: &str, graph: serde_json::Value) {
        self.add(id, "blueprint", graph.to_string());
    }
}

// --- Asset bytes ---

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 10, 10, 255]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// Minimal valid glTF JSON with one triangle mesh per name.
pub fn gltf_bytes(mesh_names: &[&str]) -> Vec<u8> {
    let meshes: Vec<serde_json::Value> = mesh_names
        .iter()
        .map(|name| {
            serde_json::json!({
                "name": name,
                "primitives": [{ "attributes": { "POSITION": 0 } }]
            })
        })
        .collect();

    serde_json::json!({
        "asset": { "version": "2.0" },
        "buffers": [{ "byteLength": 36 }],
        "bufferViews": [{ "buffer": 0, "byteLength": 36 }],
        "accessors": [{
            "bufferView": 0,
            "componentType": 5126,
            "count": 3,
            "type": "VEC3",
            "min": [0.0, 0.0, 0.0],
            "max": [1.0, 1.0, 0.0]
        }],
        "meshes": meshes
    })
    .to_string()
    .into_bytes()
}
