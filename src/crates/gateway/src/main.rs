//! skyforge server binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use agent::{Orchestrator, OrchestratorConfig};
use gateway::create_router;
use llm::{GeminiClient, ModelConfig};
use pipeline::{ExecutionMode, TerraformCli};

/// Autonomous cloud-infrastructure design agent.
#[derive(Debug, Parser)]
#[command(name = "skyforge-server", version, about)]
struct Args {
    /// Listen port.
    #[arg(long, env = "SKYFORGE_PORT", default_value_t = 8080)]
    port: u16,

    /// Session state directory.
    #[arg(long, env = "SKYFORGE_SESSION_DIR", default_value = "./sessions")]
    session_dir: PathBuf,

    /// Toolchain workspace directory.
    #[arg(long, env = "SKYFORGE_WORKSPACE_DIR", default_value = "/tmp/skyforge_workspace")]
    workspace_dir: PathBuf,

    /// Model backend id.
    #[arg(long, env = "SKYFORGE_MODEL", default_value = llm::DEFAULT_MODEL)]
    model: String,

    /// Execution mode: deploy (full simulator run) or draft (plan only).
    #[arg(long, env = "SKYFORGE_EXECUTION_MODE", default_value = "deploy")]
    execution_mode: ExecutionMode,

    /// Simulate apply/verify in draft mode.
    #[arg(long, env = "SKYFORGE_SIMULATE_PIPELINE")]
    simulate_pipeline: bool,

    /// Write timestamped debug snapshots on phase transitions.
    #[arg(long)]
    debug_snapshots: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let model_config =
        ModelConfig::from_env(&args.model).context("model backend credential missing")?;
    let backend = Arc::new(GeminiClient::new(model_config).context("building model client")?);
    let toolchain = Arc::new(TerraformCli::default());

    let mut config = OrchestratorConfig::new(&args.session_dir, &args.workspace_dir);
    config.execution_mode = args.execution_mode;
    config.simulate_pipeline = args.simulate_pipeline;
    config.debug_snapshots = args.debug_snapshots;

    let orchestrator =
        Arc::new(Orchestrator::new(backend, toolchain, config).context("restoring session")?);
    let router = create_router(orchestrator);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], args.port));
    info!(%addr, model = %args.model, "skyforge server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("binding listen address")?;
    axum::serve(listener, router).await.context("serving")?;
    Ok(())
}
