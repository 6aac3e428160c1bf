//! One supervised worker process and its private IPC link.
//!
//! The link is the worker's stdin/stdout pair carrying newline-delimited
//! JSON frames; stderr is forwarded line by line to the log bus. The
//! orchestrator never looks inside a plugin — the message contract
//! (hello, heartbeat, event in / result out, shutdown) is all it knows.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use botpod_protocol::{read_frame, write_frame, DeliveryOutcome, HostMessage, WorkerMessage};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::logbus::LogBus;
use crate::registry::PluginRecord;

/// Identity a worker reports in its handshake frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub id: String,
    pub name: String,
    pub version: String,
}

type PendingMap = Arc<parking_lot::Mutex<HashMap<u64, oneshot::Sender<DeliveryOutcome>>>>;

pub struct WorkerHandle {
    plugin_id: String,
    pid: Option<u32>,
    identity: WorkerIdentity,
    child: tokio::sync::Mutex<Child>,
    outbound: mpsc::UnboundedSender<HostMessage>,
    pending: PendingMap,
    next_seq: AtomicU64,
    last_heartbeat: Arc<parking_lot::Mutex<Instant>>,
    exit_rx: watch::Receiver<bool>,
}

impl WorkerHandle {
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub fn last_heartbeat(&self) -> Instant {
        *self.last_heartbeat.lock()
    }

    pub fn has_exited(&self) -> bool {
        *self.exit_rx.borrow()
    }

    pub fn exit_watch(&self) -> watch::Receiver<bool> {
        self.exit_rx.clone()
    }

    /// Forwards one event frame and waits for the matching result up to
    /// `deadline`. Never blocks past the deadline.
    pub async fn deliver_event(
        &self,
        payload: serde_json::Value,
        deadline: Duration,
    ) -> DeliveryOutcome {
        if self.has_exited() {
            return DeliveryOutcome::Unavailable;
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(seq, tx);

        if self
            .outbound
            .send(HostMessage::Event { seq, payload })
            .is_err()
        {
            self.pending.lock().remove(&seq);
            return DeliveryOutcome::Unavailable;
        }

        match timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped: the worker went away mid-call.
            Ok(Err(_)) => DeliveryOutcome::Unavailable,
            Err(_) => {
                self.pending.lock().remove(&seq);
                DeliveryOutcome::Timeout
            }
        }
    }

    /// Asks the worker to exit on its own. Best effort; the supervisor
    /// escalates to `kill` after the grace period.
    pub fn request_shutdown(&self) {
        let _ = self.outbound.send(HostMessage::Shutdown);
    }

    pub async fn kill(&self) {
        let mut child = self.child.lock().await;
        if let Err(e) = child.start_kill() {
            debug!(
                target: "botpod::worker",
                plugin_id = %self.plugin_id,
                "kill failed (process likely already gone): {e}"
            );
        }
    }

    /// Waits up to `grace` for the process to exit. Returns whether it did.
    pub async fn wait_exit(&self, grace: Duration) -> bool {
        let mut child = self.child.lock().await;
        timeout(grace, child.wait()).await.is_ok()
    }
}

/// Spawns the worker process for `record` and completes the handshake.
///
/// The record transitions to `running` only after the worker's `hello`
/// frame arrives within `handshake_timeout`; anything else tears the
/// process down and reports the failure.
pub async fn spawn_worker(
    record: &PluginRecord,
    handshake_timeout: Duration,
    logbus: LogBus,
) -> Result<WorkerHandle> {
    let mut command = Command::new(&record.entry.command);
    command
        .args(&record.entry.args)
        .envs(&record.entry.env)
        .current_dir(&record.dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| Error::operation("worker spawn", format!("{}: {e}", record.entry.command)))?;
    let pid = child.id();

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::operation("worker spawn", "missing stdin pipe".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::operation("worker spawn", "missing stdout pipe".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::operation("worker spawn", "missing stderr pipe".to_string()))?;

    spawn_stderr_task(record.id.clone(), stderr, logbus.clone());

    let mut reader = BufReader::new(stdout);
    let identity = match timeout(handshake_timeout, read_frame::<_, WorkerMessage>(&mut reader)).await
    {
        Ok(Ok(Some(WorkerMessage::Hello { id, name, version }))) => {
            WorkerIdentity { id, name, version }
        }
        Ok(Ok(Some(other))) => {
            let _ = child.start_kill();
            return Err(Error::operation(
                "worker handshake",
                format!("unexpected first frame: {other:?}"),
            ));
        }
        Ok(Ok(None)) => {
            let _ = child.start_kill();
            return Err(Error::operation(
                "worker handshake",
                "worker closed its stream before hello".to_string(),
            ));
        }
        Ok(Err(e)) => {
            let _ = child.start_kill();
            return Err(Error::operation("worker handshake", e.to_string()));
        }
        Err(_) => {
            let _ = child.start_kill();
            return Err(Error::timeout("worker handshake"));
        }
    };

    if identity.id != record.id {
        warn!(
            target: "botpod::worker",
            plugin_id = %record.id,
            reported_id = %identity.id,
            "worker hello reports a different plugin id"
        );
    }

    let pending: PendingMap = Arc::new(parking_lot::Mutex::new(HashMap::new()));
    let last_heartbeat = Arc::new(parking_lot::Mutex::new(Instant::now()));
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (exit_tx, exit_rx) = watch::channel(false);

    spawn_writer_task(record.id.clone(), stdin, outbound_rx);
    spawn_reader_task(
        record.id.clone(),
        reader,
        pending.clone(),
        last_heartbeat.clone(),
        logbus,
        exit_tx,
    );

    Ok(WorkerHandle {
        plugin_id: record.id.clone(),
        pid,
        identity,
        child: tokio::sync::Mutex::new(child),
        outbound: outbound_tx,
        pending,
        next_seq: AtomicU64::new(1),
        last_heartbeat,
        exit_rx,
    })
}

fn spawn_stderr_task(plugin_id: String, stderr: tokio::process::ChildStderr, logbus: LogBus) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "botpod::worker", plugin_id = %plugin_id, "{line}");
            logbus.publish(&plugin_id, line);
        }
    });
}

fn spawn_writer_task(
    plugin_id: String,
    mut stdin: tokio::process::ChildStdin,
    mut outbound_rx: mpsc::UnboundedReceiver<HostMessage>,
) {
    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(e) = write_frame(&mut stdin, &message).await {
                debug!(
                    target: "botpod::worker",
                    plugin_id = %plugin_id,
                    "stopped writing to worker: {e}"
                );
                break;
            }
        }
    });
}

fn spawn_reader_task(
    plugin_id: String,
    mut reader: BufReader<tokio::process::ChildStdout>,
    pending: PendingMap,
    last_heartbeat: Arc<parking_lot::Mutex<Instant>>,
    logbus: LogBus,
    exit_tx: watch::Sender<bool>,
) {
    tokio::spawn(async move {
        loop {
            match read_frame::<_, WorkerMessage>(&mut reader).await {
                Ok(Some(message)) => {
                    // Any frame proves the worker is alive.
                    *last_heartbeat.lock() = Instant::now();
                    match message {
                        WorkerMessage::Heartbeat => {}
                        WorkerMessage::EventResult {
                            seq,
                            payload,
                            error,
                        } => {
                            let waiter = pending.lock().remove(&seq);
                            let outcome = match error {
                                Some(message) => DeliveryOutcome::Error { message },
                                None => DeliveryOutcome::Ok { payload },
                            };
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(outcome);
                                }
                                None => debug!(
                                    target: "botpod::worker",
                                    plugin_id = %plugin_id,
                                    seq,
                                    "dropping event result with no waiter"
                                ),
                            }
                        }
                        WorkerMessage::Log { level, message } => {
                            debug!(
                                target: "botpod::worker",
                                plugin_id = %plugin_id,
                                level = level.as_deref().unwrap_or("info"),
                                "{message}"
                            );
                            logbus.publish(&plugin_id, message);
                        }
                        WorkerMessage::Hello { .. } => {
                            debug!(
                                target: "botpod::worker",
                                plugin_id = %plugin_id,
                                "ignoring duplicate hello"
                            );
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        target: "botpod::worker",
                        plugin_id = %plugin_id,
                        "worker stream error: {e}"
                    );
                    break;
                }
            }
        }

        // Fail every in-flight delivery before announcing the exit.
        let waiters: Vec<_> = pending.lock().drain().collect();
        for (_, tx) in waiters {
            let _ = tx.send(DeliveryOutcome::Unavailable);
        }
        let _ = exit_tx.send(true);
    });
}
