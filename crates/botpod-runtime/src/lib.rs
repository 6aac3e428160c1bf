//! Plugin runtime orchestrator: discovers plugin directories, reconciles
//! their dependency installs, supervises out-of-process workers and serves
//! the control/debug channels.

pub mod artifact;
pub mod config;
pub mod deps;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod logbus;
pub mod registry;
pub mod server;
pub mod supervisor;
pub mod worker;

use std::sync::Arc;

use tracing::info;

pub use config::{ControlTransport, RuntimeConfig};
pub use deps::{CommandInstaller, DependencyManager, DepsOutcome, PackageInstaller};
pub use descriptor::ScanReport;
pub use dispatcher::EventDispatcher;
pub use error::{Error, Result};
pub use logbus::LogBus;
pub use registry::PluginRegistry;
pub use server::{serve_stdio_control, serve_tcp, ChannelContext, ChannelMode};
pub use supervisor::{LaunchReport, Supervisor};

/// Owns the runtime's long-lived components and wires them together.
pub struct Orchestrator {
    config: Arc<RuntimeConfig>,
    registry: Arc<PluginRegistry>,
    deps: Arc<DependencyManager>,
    supervisor: Arc<Supervisor>,
    dispatcher: Arc<EventDispatcher>,
    logbus: LogBus,
}

impl Orchestrator {
    /// Builds an orchestrator around the configured installer command.
    pub fn new(config: RuntimeConfig) -> Self {
        let installer = Arc::new(CommandInstaller::new(&config.installer));
        Self::with_installer(config, installer)
    }

    /// Same wiring with a caller-supplied installer.
    pub fn with_installer(config: RuntimeConfig, installer: Arc<dyn PackageInstaller>) -> Self {
        let config = Arc::new(config);
        let registry = PluginRegistry::new(config.plugin_root.clone()).into_shared();
        let deps = Arc::new(DependencyManager::new(installer));
        let logbus = LogBus::new();
        let supervisor = Supervisor::new(
            Arc::clone(&registry),
            Arc::clone(&deps),
            Arc::clone(&config),
            logbus.clone(),
        );
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&supervisor),
        ));
        Self {
            config,
            registry,
            deps,
            supervisor,
            dispatcher,
            logbus,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Scans the plugin root and launches every discovered plugin. Failures
    /// are reported per plugin; one plugin never blocks another.
    pub async fn start(&self) -> Result<(ScanReport, LaunchReport)> {
        let scan = self.registry.discover().await?;
        let launch = self.supervisor.launch_all().await;
        info!(
            target: "botpod::runtime",
            discovered = scan.discovered.len(),
            launched = launch.launched.len(),
            failed = launch.failed.len(),
            "startup reconciliation complete"
        );
        Ok((scan, launch))
    }

    pub fn channel_context(&self) -> ChannelContext {
        ChannelContext {
            registry: Arc::clone(&self.registry),
            supervisor: Arc::clone(&self.supervisor),
            dispatcher: Arc::clone(&self.dispatcher),
            deps: Arc::clone(&self.deps),
            logbus: self.logbus.clone(),
        }
    }

    /// Serves the primary control channel on the configured transport.
    /// Returns when the stdio peer disconnects; the TCP accept loop runs
    /// until the task is aborted.
    pub async fn serve_control(&self) -> Result<()> {
        let ctx = self.channel_context();
        match &self.config.control {
            ControlTransport::Stdio => serve_stdio_control(&ctx).await,
            ControlTransport::Tcp { bind } => serve_tcp(ctx, ChannelMode::Control, bind).await,
        }
    }

    /// Spawns the debug channel listener when enabled.
    pub fn spawn_debug_server(&self) -> Option<tokio::task::JoinHandle<Result<()>>> {
        if !self.config.debug.enabled {
            return None;
        }
        let ctx = self.channel_context();
        let bind = self.config.debug.bind.clone();
        Some(tokio::spawn(async move {
            serve_tcp(ctx, ChannelMode::Debug, &bind).await
        }))
    }

    /// Gracefully stops every worker.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown_all().await;
    }
}
