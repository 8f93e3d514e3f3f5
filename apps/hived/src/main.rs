mod consumer;
mod processes;
mod tasks;
mod world;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use hive_kernel::{KernelBuilder, KernelConfig};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "hived")]
#[command(about = "hive colony scheduler demo daemon")]
struct Cli {
    /// Directory holding the checkpoint store.
    #[arg(long, default_value = ".hive")]
    root: PathBuf,
    /// World snapshot JSON; replayed each tick with the tick number bumped.
    /// Without it a synthetic two-colony world is generated.
    #[arg(long)]
    world: Option<PathBuf>,
    #[arg(long, default_value_t = 5)]
    ticks: u64,
    /// Kernel config JSON. Missing fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Compact => registry.with(fmt::layer().compact()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

async fn load_config(path: Option<&PathBuf>) -> Result<KernelConfig> {
    let Some(path) = path else {
        return Ok(processes::default_config());
    };
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed reading config {path:?}"))?;
    serde_json::from_str(&text).with_context(|| format!("failed parsing config {path:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = load_config(cli.config.as_ref()).await?;
    let tasks = Arc::new(tasks::registry()?);
    let kernel = KernelBuilder::new(processes::registry(tasks)?)
        .config(config)
        .file_store(&cli.root)
        .build();

    let base = match &cli.world {
        Some(path) => Some(world::load(path).await?),
        None => None,
    };
    let start = kernel
        .store()
        .manifest(&kernel.config().checkpoint_key)
        .await?
        .map_or(1, |manifest| manifest.tick + 1);
    info!(root = ?cli.root, start, ticks = cli.ticks, "daemon started");

    let mut last = None;
    for tick in start..start + cli.ticks {
        let snapshot = match &base {
            Some(base) => {
                let mut snapshot = base.clone();
                snapshot.tick = tick;
                snapshot
            }
            None => world::synthetic(tick),
        };
        let report = kernel.tick(&snapshot).await?;
        consumer::consume(&report);
        last = Some(snapshot);
    }

    if let Some(snapshot) = last {
        for row in kernel.tree(&snapshot).await? {
            info!(
                id = %row.id,
                parent = %row.parent,
                type_tag = %row.type_tag,
                depth = row.depth,
                running = row.running,
                "process"
            );
        }
    }
    Ok(())
}
