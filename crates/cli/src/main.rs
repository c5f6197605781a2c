use acqwatch_lifecycle::{
    FsProbe, IndexRefresher, LifecycleOrchestrator, RecordSource, WatchEvent, WatchPolicy,
};
use acqwatch_request_index::RequestIndex;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

mod discovery;
mod manifest;
mod records;

#[derive(Parser)]
#[command(name = "acqwatch")]
#[command(about = "Watches instrument output and registers resolved datasets", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a directory and emit registration manifests for resolved
    /// datasets
    Watch(WatchArgs),

    /// Resolve names against the request records once and exit
    Resolve(ResolveArgs),
}

#[derive(Args)]
struct WatchArgs {
    /// Directory the acquisition software writes into
    #[arg(long)]
    root: PathBuf,

    /// JSON file with pending request records
    #[arg(long)]
    requests: PathBuf,

    /// Output directory for registration manifests
    #[arg(long, default_value = "manifests")]
    out: PathBuf,

    /// TOML policy file (missing keys fall back to defaults)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct ResolveArgs {
    /// JSON file with pending request records
    #[arg(long)]
    requests: PathBuf,

    /// Names to resolve
    #[arg(required = true)]
    names: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Watch(args) => run_watch(args).await,
        Commands::Resolve(args) => run_resolve(args).await,
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Stderr)
        .init();
}

fn load_policy(config: Option<&Path>) -> Result<WatchPolicy> {
    let Some(path) = config else {
        return Ok(WatchPolicy::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

async fn run_watch(args: WatchArgs) -> Result<()> {
    let policy = load_policy(args.config.as_deref())?;
    let (event_tx, _) = broadcast::channel(64);

    let source = Arc::new(records::FileRecordSource::new(args.requests));
    let refresher = IndexRefresher::start(source, policy.refresh_interval(), event_tx.clone());
    refresher.refresh("startup").await?;

    let writer = Arc::new(
        manifest::ManifestWriter::new(&args.out)
            .with_context(|| format!("preparing output directory {}", args.out.display()))?,
    );
    let orchestrator = LifecycleOrchestrator::start(
        policy,
        refresher.index(),
        Arc::new(FsProbe),
        writer,
        event_tx.clone(),
    );

    spawn_event_logger(event_tx.subscribe());
    let _discovery = discovery::spawn(args.root.clone(), orchestrator.clone())
        .with_context(|| format!("watching {}", args.root.display()))?;
    info!("watching {} for new datasets", args.root.display());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}

fn spawn_event_logger(mut events: broadcast::Receiver<WatchEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(WatchEvent::Resolved {
                    source_path,
                    request_id,
                    request_name,
                }) => info!(
                    "resolved {} -> request {request_id} ('{request_name}')",
                    source_path.display()
                ),
                Ok(WatchEvent::ArtifactSent { source_path }) => {
                    info!("registered {}", source_path.display());
                }
                Ok(WatchEvent::Failed {
                    source_path,
                    reason,
                }) => warn!("failed {} ({reason:?})", source_path.display()),
                Ok(WatchEvent::IndexRebuilt {
                    entries,
                    duration_ms,
                }) => info!("request index rebuilt: {entries} entries in {duration_ms}ms"),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("event log lagged, {missed} events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn run_resolve(args: ResolveArgs) -> Result<()> {
    let source = records::FileRecordSource::new(args.requests);
    let records = source.fetch().await?;

    let mut index = RequestIndex::new();
    for record in &records {
        index.insert(&record.name, record.request_id);
    }
    index.prune();

    // stdout is reserved for results; diagnostics go to the logger.
    for name in &args.names {
        match index.find(name).request_id {
            Some(request_id) => println!("{name}\t{request_id}"),
            None => println!("{name}\tnot-found"),
        }
    }
    Ok(())
}
