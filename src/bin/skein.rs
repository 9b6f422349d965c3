use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use skein::config::{RuntimeConfig, load_config};
use skein::engine::{GraphEngine, LocalEngine, NativeEngine};
use skein::provider::ArtifactProvider;
use skein::resource::Catalog;
use skein::runtime::{ExecutionData, ExecutionOrchestrator, NodeRegistry, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Setup {
    /// Runtime configuration (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Catalog file to register; repeatable, earlier files win
    #[arg(long = "catalog")]
    catalogs: Vec<PathBuf>,

    /// Interpreter shared library to use instead of the built-in engine
    #[arg(long)]
    native: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a blueprint and print its outputs as JSON
    Run {
        /// Resource id of the root blueprint
        #[arg(long)]
        root: String,

        #[command(flatten)]
        setup: Setup,

        /// Root graph input as name=value; value is parsed as JSON, else taken as a string
        #[arg(short = 'D', value_name = "NAME=VALUE")]
        inputs: Vec<String>,
    },
    /// Download every catalogued resource into the cache
    Preload {
        #[command(flatten)]
        setup: Setup,
    },
    /// Validate a catalog file and list its resources
    Catalog {
        file: PathBuf,
    },
}

fn build_provider(setup: &Setup) -> Result<(RuntimeConfig, Arc<ArtifactProvider>)> {
    let mut config = match &setup.config {
        Some(path) => load_config(path)?,
        None => RuntimeConfig::default(),
    };
    config.catalogs.extend(setup.catalogs.iter().cloned());

    let engine: Arc<dyn GraphEngine> = match &setup.native {
        Some(lib) => Arc::new(NativeEngine::open(lib).with_context(|| format!("Failed to open {}", lib.display()))?),
        None => Arc::new(LocalEngine::new()),
    };
    let registry = Arc::new(NodeRegistry::with_builtins());
    let provider = ArtifactProvider::from_config(&config, engine, registry)?;
    Ok((config, Arc::new(provider)))
}

fn parse_input(raw: &str) -> Result<(String, Value)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("Input '{}' is not NAME=VALUE", raw);
    };
    let value = serde_json::from_str(value)
        .map(Value::from_json)
        .unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { root, setup, inputs } => {
            let (config, provider) = build_provider(&setup)?;

            let mut data = ExecutionData::new();
            for raw in &inputs {
                let (name, value) = parse_input(raw)?;
                data = data.with_input(name, value);
            }

            let orchestrator = ExecutionOrchestrator::new(provider).with_timeout(config.execution_timeout());
            let result = orchestrator.execute(&data, &root).await;

            let report = serde_json::json!({
                "success": result.success,
                "instance_id": result.instance_id,
                "outputs": result.outputs_json(),
                "failed_branches": result.failed_branches,
                "error": result.error,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::Preload { setup } => {
            let (_, provider) = build_provider(&setup)?;
            let total = provider.resource_ids().len();
            let failures = provider.preload_all().await;
            for (id, e) in &failures {
                warn!(id = %id, error = %e, "Preload failed");
            }
            info!(total, failed = failures.len(), "Preload finished");
            if !failures.is_empty() {
                bail!("{} of {} resources failed to preload", failures.len(), total);
            }
        }
        Commands::Catalog { file } => {
            let catalog = Catalog::from_file(&file).with_context(|| format!("Failed to load catalog {}", file.display()))?;
            println!("catalog {} ({} resources)", catalog.version(), catalog.len());
            for descriptor in catalog.iter() {
                println!(
                    "{:<24} {:<10} {:<12} {}",
                    descriptor.id().as_str(),
                    descriptor.kind().as_str(),
                    descriptor.hash().unwrap_or("-"),
                    descriptor.uri()
                );
            }
        }
    }

    Ok(())
}
