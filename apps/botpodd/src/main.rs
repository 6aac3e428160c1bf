mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use botpod_runtime::{ControlTransport, Orchestrator, RuntimeConfig};

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_filter.as_deref());

    let config = build_config(&cli)?;
    let orchestrator = Orchestrator::new(config);

    let (scan, launch) = orchestrator
        .start()
        .await
        .context("startup reconciliation failed")?;
    for skipped in &scan.skipped {
        warn!(
            dir = %skipped.dir.display(),
            reason = %skipped.reason,
            "skipped plugin directory"
        );
    }
    for failure in &launch.failed {
        warn!(
            plugin_id = %failure.plugin_id,
            error = %failure.error,
            "plugin failed to launch"
        );
    }

    let debug_server = orchestrator.spawn_debug_server();

    tokio::select! {
        result = orchestrator.serve_control() => {
            match result {
                Ok(()) => info!("control channel closed"),
                Err(e) => warn!(error = %e, "control channel failed"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }

    if let Some(handle) = debug_server {
        handle.abort();
    }
    orchestrator.shutdown().await;
    Ok(())
}

fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    // Logs go to stderr: stdout may be carrying control channel frames.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(cli: &Cli) -> Result<RuntimeConfig> {
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    if let Some(root) = &cli.plugin_root {
        config.plugin_root = root.clone();
    }
    if cli.stdio {
        config.control = ControlTransport::Stdio;
    } else if let Some(bind) = &cli.control_bind {
        config.control = ControlTransport::Tcp { bind: bind.clone() };
    }
    if let Some(bind) = &cli.debug_bind {
        config.debug.enabled = true;
        config.debug.bind = bind.clone();
    }
    Ok(config)
}
