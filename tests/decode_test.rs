mod common;

use common::{gltf_bytes, png_bytes};
use serde_json::json;
use skein::decode::{BlueprintDecoder, Decoder, JsonDecoder, MeshDecoder, TextureDecoder};
use skein::engine::{GraphEngine, LocalEngine};
use skein::error::ResolveError;
use skein::resource::{
    BlueprintSettings, ImportSettings, MeshSettings, ResourceDescriptor, ResourceId, ResourceType, SchemaVersion,
    VersionRange,
};
use skein::runtime::NodeRegistry;
use std::sync::Arc;

fn descriptor(id: &str, kind: ResourceType) -> ResourceDescriptor {
    ResourceDescriptor::new(ResourceId::new(id).unwrap(), format!("mem://{id}"), kind)
}

fn mesh_descriptor(selector: Option<&str>) -> ResourceDescriptor {
    descriptor("body", ResourceType::Mesh).with_settings(ImportSettings::Mesh(MeshSettings {
        mesh: selector.map(str::to_string),
    }))
}

#[tokio::test]
async fn test_texture_decodes_to_rgba() {
    let texture = TextureDecoder
        .decode(&descriptor("skin", ResourceType::Texture), png_bytes(5, 3))
        .await
        .unwrap();

    assert_eq!((texture.width, texture.height), (5, 3));
    assert!(texture.srgb, "sRGB is the default without settings");
    assert_eq!(texture.pixels.len(), 5 * 3 * 4);
    assert_eq!(&texture.pixels[..4], &[200, 10, 10, 255]);
}

#[tokio::test]
async fn test_texture_rejects_garbage() {
    let result = TextureDecoder
        .decode(&descriptor("skin", ResourceType::Texture), b"GIF? no".to_vec())
        .await;
    assert!(matches!(result, Err(ResolveError::Decode { kind: "texture", id, .. }) if id == "skin"));
}

#[tokio::test]
async fn test_mesh_selection() {
    let bytes = gltf_bytes(&["Head", "Torso", "Legs"]);

    let first = MeshDecoder.decode(&mesh_descriptor(None), bytes.clone()).await.unwrap();
    assert_eq!((first.mesh_index, first.mesh_name.as_deref()), (0, Some("Head")));
    assert_eq!(first.mesh_count, 3);
    assert_eq!(first.bytes.len(), bytes.len());

    let by_name = MeshDecoder.decode(&mesh_descriptor(Some("Legs")), bytes.clone()).await.unwrap();
    assert_eq!(by_name.mesh_index, 2);

    let by_index = MeshDecoder.decode(&mesh_descriptor(Some("1")), bytes.clone()).await.unwrap();
    assert_eq!(by_index.mesh_name.as_deref(), Some("Torso"));

    let missing = MeshDecoder.decode(&mesh_descriptor(Some("Tail")), bytes).await;
    assert!(matches!(missing, Err(ResolveError::Decode { reason, .. }) if reason.contains("Tail")));
}

#[tokio::test]
async fn test_mesh_rejects_non_gltf() {
    let result = MeshDecoder.decode(&mesh_descriptor(None), b"solid cube".to_vec()).await;
    assert!(matches!(result, Err(ResolveError::Decode { kind: "mesh", .. })));
}

#[tokio::test]
async fn test_json_decoder() {
    #[derive(Debug, PartialEq, serde::Deserialize)]
    struct Palette {
        colors: Vec<String>,
    }

    let decoder = JsonDecoder::<Palette>::new();
    let target = descriptor("palette", ResourceType::Json);

    let palette = decoder
        .decode(&target, br##"{ "colors": ["#fff", "#000"] }"##.to_vec())
        .await
        .unwrap();
    assert_eq!(palette.colors, vec!["#fff", "#000"]);

    let wrong_shape = decoder.decode(&target, br#"{ "colours": [] }"#.to_vec()).await;
    assert!(matches!(wrong_shape, Err(ResolveError::Decode { kind: "json", .. })));
}

fn blueprint_decoder(engine: Arc<LocalEngine>) -> BlueprintDecoder {
    BlueprintDecoder::new(engine, Arc::new(NodeRegistry::with_builtins()), VersionRange::default())
}

#[test]
fn test_blueprint_version_check() {
    let decoder = blueprint_decoder(Arc::new(LocalEngine::new()));
    let plain = descriptor("bp", ResourceType::Blueprint);

    let header = decoder.check_version(&plain, r#"{ "version": "1.4.2" }"#).unwrap();
    assert_eq!(header, SchemaVersion::new(1, 4, 2));

    // The catalog's settings fill in when the document declares nothing.
    let with_settings = descriptor("bp", ResourceType::Blueprint).with_settings(ImportSettings::Blueprint(
        BlueprintSettings {
            version: Some("1.1".to_string()),
        },
    ));
    assert_eq!(
        decoder.check_version(&with_settings, r#"{ "nodes": [] }"#).unwrap(),
        SchemaVersion::new(1, 1, 0)
    );

    assert!(matches!(
        decoder.check_version(&plain, r#"{ "nodes": [] }"#),
        Err(ResolveError::UnsupportedVersion { found, .. }) if found == "<none>"
    ));
    assert!(matches!(
        decoder.check_version(&plain, r#"{ "version": "0.9.0" }"#),
        Err(ResolveError::UnsupportedVersion { min, .. }) if min == "1.0.0"
    ));
    assert!(matches!(
        decoder.check_version(&plain, r#"{ "version": "banana" }"#),
        Err(ResolveError::UnsupportedVersion { .. })
    ));

    let narrow = decoder.with_supported(VersionRange::new(SchemaVersion::new(1, 0, 0), SchemaVersion::new(1, 0, 9)));
    assert!(narrow.check_version(&plain, r#"{ "version": "1.4.2" }"#).is_err());
}

#[tokio::test]
async fn test_blueprint_decode_loads_and_releases() {
    let engine = Arc::new(LocalEngine::new());
    let decoder = blueprint_decoder(engine.clone());
    let graph = json!({
        "version": "1.0.0",
        "outputs": [{ "name": "result" }],
        "nodes": [ { "id": "a", "kind": "log", "params": { "message": "hi" } } ]
    });

    let instance = decoder
        .decode(&descriptor("bp", ResourceType::Blueprint), graph.to_string().into_bytes())
        .await
        .unwrap();
    assert_eq!(instance.id().as_str(), "bp");
    assert_eq!(instance.outputs()[0].name, "result");
    assert_eq!(instance.version().as_deref(), Some("1.0.0"));
    assert_eq!(engine.loaded_graphs(), 1);

    drop(instance);
    assert_eq!(engine.loaded_graphs(), 0);

    let unsupported = json!({ "version": "3.0.0", "nodes": [] });
    let rejected = decoder
        .decode(&descriptor("bp", ResourceType::Blueprint), unsupported.to_string().into_bytes())
        .await;
    assert!(matches!(rejected, Err(ResolveError::UnsupportedVersion { .. })));
    assert_eq!(engine.loaded_graphs(), 0);

    let broken = json!({ "version": "1.0.0", "nodes": [ { "id": "a", "kind": "nope" } ] });
    let failed = decoder
        .decode(&descriptor("bp", ResourceType::Blueprint), broken.to_string().into_bytes())
        .await;
    assert!(matches!(failed, Err(ResolveError::Engine(_))));
}

#[test]
fn test_engine_trait_object_is_usable() {
    let engine: Arc<dyn GraphEngine> = Arc::new(LocalEngine::new());
    let handle = engine
        .load(&NodeRegistry::with_builtins(), r#"{ "version": "1.0.0" }"#)
        .unwrap();
    assert!(engine.inputs(handle).is_empty());
    engine.release(handle);
}
