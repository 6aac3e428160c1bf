//! Worker process lifecycle: launch, health monitoring, bounded restarts,
//! hot reload and graceful shutdown.
//!
//! Per-plugin operations are strictly serialized; operations across
//! different plugins run fully in parallel. One plugin failing to install
//! or launch never blocks another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use botpod_protocol::{DeliveryOutcome, PluginState};
use futures_util::future::join_all;
use tracing::{info, warn};

use crate::config::{RestartPolicyConfig, RuntimeConfig};
use crate::deps::DependencyManager;
use crate::error::{Error, Result};
use crate::logbus::LogBus;
use crate::registry::PluginRegistry;
use crate::worker::{spawn_worker, WorkerHandle};

/// Bounded restart policy: capped exponential backoff inside a rolling
/// window, permanent `stopped` once the window's attempts are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub window: Duration,
    pub backoff: Duration,
    pub backoff_cap: Duration,
}

impl From<&RestartPolicyConfig> for RestartPolicy {
    fn from(config: &RestartPolicyConfig) -> Self {
        Self {
            max_restarts: config.max_restarts,
            window: Duration::from_millis(config.window_ms),
            backoff: Duration::from_millis(config.backoff_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Retry { delay: Duration },
    GiveUp,
}

/// Tracks crash timestamps for one plugin against a [`RestartPolicy`].
#[derive(Debug, Default)]
pub struct RestartTracker {
    window_start: Option<Instant>,
    failures: u32,
}

impl RestartTracker {
    pub fn on_failure(&mut self, policy: &RestartPolicy, now: Instant) -> RestartDecision {
        match self.window_start {
            Some(start) if now.duration_since(start) <= policy.window => {}
            _ => {
                self.window_start = Some(now);
                self.failures = 0;
            }
        }
        self.failures += 1;

        if self.failures > policy.max_restarts {
            return RestartDecision::GiveUp;
        }
        let exponent = self.failures.saturating_sub(1).min(16);
        let delay = policy
            .backoff
            .saturating_mul(1u32 << exponent)
            .min(policy.backoff_cap);
        RestartDecision::Retry { delay }
    }

    pub fn reset(&mut self) {
        self.window_start = None;
        self.failures = 0;
    }
}

#[derive(Debug, Clone)]
pub struct LaunchFailure {
    pub plugin_id: String,
    pub error: String,
}

/// Per-plugin outcome of `launch_all`.
#[derive(Debug, Clone, Default)]
pub struct LaunchReport {
    pub launched: Vec<String>,
    pub failed: Vec<LaunchFailure>,
}

pub struct Supervisor {
    registry: Arc<PluginRegistry>,
    deps: Arc<DependencyManager>,
    config: Arc<RuntimeConfig>,
    logbus: LogBus,
    policy: RestartPolicy,
    workers: tokio::sync::Mutex<HashMap<String, Arc<WorkerHandle>>>,
    trackers: tokio::sync::Mutex<HashMap<String, RestartTracker>>,
    plugin_locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    shutting_down: AtomicBool,
}

impl Supervisor {
    pub fn new(
        registry: Arc<PluginRegistry>,
        deps: Arc<DependencyManager>,
        config: Arc<RuntimeConfig>,
        logbus: LogBus,
    ) -> Arc<Self> {
        let policy = RestartPolicy::from(&config.restart);
        Arc::new(Self {
            registry,
            deps,
            config,
            logbus,
            policy,
            workers: tokio::sync::Mutex::new(HashMap::new()),
            trackers: tokio::sync::Mutex::new(HashMap::new()),
            plugin_locks: parking_lot::Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        })
    }

    fn plugin_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.plugin_locks.lock();
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Ensures dependencies, spawns the worker and waits for its handshake.
    /// Launch failures mark the record `crashed` and feed the restart
    /// policy; installer failures leave the plugin `stopped` until the next
    /// startup retries the mismatch.
    pub async fn launch(self: &Arc<Self>, id: &str) -> Result<()> {
        let lock = self.plugin_lock(id);
        let _guard = lock.lock().await;
        self.launch_locked(id).await
    }

    async fn launch_locked(self: &Arc<Self>, id: &str) -> Result<()> {
        if self.is_shutting_down() {
            return Err(Error::operation("launch", "orchestrator is shutting down"));
        }
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| Error::not_found("plugin", id))?;
        if self.workers.lock().await.contains_key(id) {
            return Ok(());
        }

        self.registry.set_state(id, PluginState::Installing).await;
        if let Err(e) = self.deps.ensure_dependencies(&record.dir).await {
            self.registry
                .set_failed(id, PluginState::Stopped, e.to_string())
                .await;
            warn!(
                target: "botpod::supervisor",
                plugin_id = %id,
                "dependency install failed: {e}"
            );
            return Err(e);
        }
        self.registry.set_state(id, PluginState::Ready).await;

        let handle = match spawn_worker(
            &record,
            self.config.handshake_timeout(),
            self.logbus.clone(),
        )
        .await
        {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                self.registry
                    .set_failed(id, PluginState::Crashed, e.to_string())
                    .await;
                self.schedule_restart(id.to_string());
                return Err(e);
            }
        };

        info!(
            target: "botpod::supervisor",
            plugin_id = %id,
            pid = handle.pid(),
            worker_version = %handle.identity().version,
            "worker running"
        );
        self.workers
            .lock()
            .await
            .insert(id.to_string(), handle.clone());
        self.registry.set_state(id, PluginState::Running).await;

        let supervisor = Arc::clone(self);
        let plugin_id = id.to_string();
        tokio::spawn(async move {
            supervisor.monitor_worker(plugin_id, handle).await;
        });
        Ok(())
    }

    /// Launches every known plugin independently and reports per-plugin
    /// results.
    pub async fn launch_all(self: &Arc<Self>) -> LaunchReport {
        let ids = self.registry.ids().await;
        let tasks = ids.into_iter().map(|id| {
            let supervisor = Arc::clone(self);
            async move {
                let result = supervisor.launch(&id).await;
                (id, result)
            }
        });

        let mut report = LaunchReport::default();
        for (id, result) in join_all(tasks).await {
            match result {
                Ok(()) => report.launched.push(id),
                Err(e) => report.failed.push(LaunchFailure {
                    plugin_id: id,
                    error: e.to_string(),
                }),
            }
        }
        report
    }

    async fn monitor_worker(self: Arc<Self>, plugin_id: String, handle: Arc<WorkerHandle>) {
        let mut exit_rx = handle.exit_watch();
        let grace = self.config.heartbeat_grace();
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                changed = exit_rx.changed() => {
                    if changed.is_err() || *exit_rx.borrow() {
                        break "worker process exited";
                    }
                }
                _ = ticker.tick() => {
                    if handle.last_heartbeat().elapsed() > grace {
                        break "heartbeat missed beyond grace window";
                    }
                }
            }
        };

        if self.is_shutting_down() {
            return;
        }
        // A reload or stop may have already replaced or removed the handle;
        // only the monitor owning the current handle reports a crash.
        {
            let mut workers = self.workers.lock().await;
            match workers.get(&plugin_id) {
                Some(current) if Arc::ptr_eq(current, &handle) => {
                    workers.remove(&plugin_id);
                }
                _ => return,
            }
        }

        warn!(
            target: "botpod::supervisor",
            plugin_id = %plugin_id,
            reason,
            "worker crashed"
        );
        handle.kill().await;
        self.registry
            .set_failed(&plugin_id, PluginState::Crashed, reason)
            .await;
        self.schedule_restart(plugin_id);
    }

    fn schedule_restart(self: &Arc<Self>, plugin_id: String) {
        if self.is_shutting_down() {
            return;
        }
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let decision = {
                let mut trackers = supervisor.trackers.lock().await;
                trackers
                    .entry(plugin_id.clone())
                    .or_default()
                    .on_failure(&supervisor.policy, Instant::now())
            };
            match decision {
                RestartDecision::GiveUp => {
                    warn!(
                        target: "botpod::supervisor",
                        plugin_id = %plugin_id,
                        "restart attempts exhausted; leaving plugin stopped"
                    );
                    supervisor
                        .registry
                        .set_failed(
                            &plugin_id,
                            PluginState::Stopped,
                            "restart attempts exhausted",
                        )
                        .await;
                }
                RestartDecision::Retry { delay } => {
                    info!(
                        target: "botpod::supervisor",
                        plugin_id = %plugin_id,
                        delay_ms = delay.as_millis() as u64,
                        "scheduling worker restart"
                    );
                    tokio::time::sleep(delay).await;
                    if supervisor.is_shutting_down() {
                        return;
                    }
                    // A failed relaunch feeds back into this same policy.
                    let _ = supervisor.launch(&plugin_id).await;
                }
            }
        });
    }

    /// Stops one worker: shutdown request, bounded grace, forced kill.
    pub async fn stop(self: &Arc<Self>, id: &str) -> Result<()> {
        let lock = self.plugin_lock(id);
        let _guard = lock.lock().await;
        self.stop_locked(id).await
    }

    async fn stop_locked(self: &Arc<Self>, id: &str) -> Result<()> {
        let handle = self.workers.lock().await.remove(id);
        if let Some(handle) = handle {
            shutdown_worker(&handle, self.config.shutdown_grace()).await;
        }
        if self.registry.contains(id).await {
            self.registry.set_state(id, PluginState::Stopped).await;
        }
        Ok(())
    }

    /// Development hot reload: tear down and relaunch one plugin without
    /// touching any other worker.
    pub async fn reload(self: &Arc<Self>, id: &str) -> Result<()> {
        if !self.registry.contains(id).await {
            return Err(Error::not_found("plugin", id));
        }
        let lock = self.plugin_lock(id);
        let _guard = lock.lock().await;
        self.stop_locked(id).await?;
        self.trackers.lock().await.remove(id);
        self.launch_locked(id).await
    }

    /// Forwards one event to a worker; anything not `running` is a
    /// well-defined unavailable outcome, never an error or a wait.
    pub async fn deliver_event(
        &self,
        id: &str,
        payload: serde_json::Value,
    ) -> DeliveryOutcome {
        let Some(record) = self.registry.get(id).await else {
            return DeliveryOutcome::Unavailable;
        };
        if record.state != PluginState::Running {
            return DeliveryOutcome::Unavailable;
        }
        let handle = self.workers.lock().await.get(id).cloned();
        match handle {
            Some(handle) => {
                handle
                    .deliver_event(payload, self.config.event_timeout())
                    .await
            }
            None => DeliveryOutcome::Unavailable,
        }
    }

    /// Graceful orchestrator shutdown: every worker gets a termination
    /// request and the configured grace period before a forced kill.
    pub async fn shutdown_all(self: &Arc<Self>) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let handles: Vec<(String, Arc<WorkerHandle>)> =
            self.workers.lock().await.drain().collect();
        let grace = self.config.shutdown_grace();

        let tasks = handles.into_iter().map(|(id, handle)| {
            let registry = Arc::clone(&self.registry);
            async move {
                shutdown_worker(&handle, grace).await;
                registry.set_state(&id, PluginState::Stopped).await;
            }
        });
        join_all(tasks).await;
        info!(target: "botpod::supervisor", "all workers stopped");
    }
}

async fn shutdown_worker(handle: &WorkerHandle, grace: Duration) {
    handle.request_shutdown();
    if !handle.wait_exit(grace).await {
        warn!(
            target: "botpod::supervisor",
            plugin_id = %handle.plugin_id(),
            "worker ignored shutdown request; killing"
        );
        handle.kill().await;
        let _ = handle.wait_exit(Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
#[path = "tests/supervisor_tests.rs"]
mod tests;
