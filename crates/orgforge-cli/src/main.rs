//! orgforge - Organization and landing-zone provisioning
//!
//! Runs one provisioning pass against the simulated provider and records the
//! resulting topology in a local state directory:
//!
//! - `<state-dir>/state`: SurrealKV state table
//! - `<state-dir>/blobs`: snapshot backups

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use orgforge_core::{
    init_tracing, CloudProvider, OrganizationConfig, Orchestrator, RunContext, SimulatedProvider,
    StateStore,
};
use orgforge_state::{FsBlobStore, SurrealStateTable};
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "orgforge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision an organization hierarchy and landing-zone baseline", long_about = None)]
struct Cli {
    /// Configuration file (JSON); defaults are used when omitted
    #[arg(short, long, env = "ORGFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the state table and backups
    #[arg(long, env = "ORGFORGE_STATE_DIR", default_value = ".orgforge")]
    state_dir: PathBuf,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "orgforge run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let (ctx, _cancel) = RunContext::new(config.runtime.run_timeout());

    let table = SurrealStateTable::open_local(cli.state_dir.join("state"))
        .await
        .context("Failed to open state table")?;
    let blobs = FsBlobStore::new(&cli.state_dir).context("Failed to open backup store")?;
    let state = Arc::new(
        StateStore::new(Arc::new(table), Arc::new(blobs), config.runtime.state.clone())
            .with_metrics(Arc::clone(ctx.metrics())),
    );

    let provider: Arc<dyn CloudProvider> = Arc::new(SimulatedProvider::new());
    let orchestrator = Orchestrator::new(config, provider, Arc::clone(&state));

    let result = orchestrator.run(&ctx).await;
    state.close().await;
    let outcome = result?;

    info!(
        run_id = %outcome.run_id,
        organization = %outcome.organization.id,
        snapshot = %outcome.snapshot_key,
        "run finished"
    );
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<OrganizationConfig> {
    let Some(path) = path else {
        info!("No configuration file given, using defaults");
        return Ok(OrganizationConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    OrganizationConfig::from_json_str(&json)
        .with_context(|| format!("Failed to parse config {}", path.display()))
}
