use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser, Clone)]
#[command(name = "botpodd")]
#[command(about = "Plugin runtime orchestrator daemon")]
pub struct Cli {
    /// Path to a JSON config file. Missing fields fall back to defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the plugin root directory.
    #[arg(long)]
    pub plugin_root: Option<PathBuf>,

    /// Serve the control channel on stdio instead of the configured
    /// transport.
    #[arg(long)]
    pub stdio: bool,

    /// Override the control channel TCP bind address.
    #[arg(long)]
    pub control_bind: Option<String>,

    /// Enable the debug channel, optionally overriding its bind address.
    #[arg(long)]
    pub debug_bind: Option<String>,

    /// Log filter directive, e.g. `info` or `botpod=debug`.
    #[arg(long)]
    pub log_filter: Option<String>,
}
