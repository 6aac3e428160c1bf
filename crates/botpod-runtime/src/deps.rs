//! Dependency reconciliation for plugin directories.
//!
//! Each plugin directory may carry a `requirements.txt` manifest. The last
//! successfully installed manifest is remembered as a SHA-256 fingerprint in
//! `.deps_state.json` next to it; a matching fingerprint on startup means the
//! installer is skipped entirely. The state record is the only durable state
//! needed for that decision.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::InstallerConfig;
use crate::error::{Error, Result};

pub const DEPS_STATE_FILE_NAME: &str = ".deps_state.json";
pub const REQUIREMENTS_FILE_NAME: &str = "requirements.txt";

/// Persisted per-plugin dependency state. Unknown fields are carried along
/// untouched so external annotations survive rewrites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepsState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements_hash: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What `ensure_dependencies` ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepsOutcome {
    /// Stored fingerprint matched the manifest; nothing was invoked.
    UpToDate,
    /// Manifest is absent or has no effective content; the fingerprint was
    /// recorded without invoking the installer.
    Recorded,
    /// The installer ran and the record was updated.
    Installed,
}

/// Boundary to the external package installer. Success or failure is the
/// only semantic outcome; output is captured for diagnostics.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn install(&self, manifest_path: &Path, plugin_dir: &Path) -> Result<()>;
}

/// Shells out to the configured installer command, substituting
/// `{manifest}` and `{dir}` in every argument.
pub struct CommandInstaller {
    command: Vec<String>,
}

impl CommandInstaller {
    pub fn new(config: &InstallerConfig) -> Self {
        Self {
            command: config.command.clone(),
        }
    }

    fn render_argv(&self, manifest_path: &Path, plugin_dir: &Path) -> Vec<String> {
        let manifest = manifest_path.to_string_lossy();
        let dir = plugin_dir.to_string_lossy();
        self.command
            .iter()
            .map(|arg| arg.replace("{manifest}", &manifest).replace("{dir}", &dir))
            .collect()
    }
}

#[async_trait]
impl PackageInstaller for CommandInstaller {
    async fn install(&self, manifest_path: &Path, plugin_dir: &Path) -> Result<()> {
        let argv = self.render_argv(manifest_path, plugin_dir);
        let Some((program, args)) = argv.split_first() else {
            return Err(Error::invalid_input("installer command is empty"));
        };

        info!(
            target: "botpod::deps",
            plugin_dir = %plugin_dir.display(),
            command = %argv.join(" "),
            "invoking package installer"
        );
        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(plugin_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::operation("installer spawn", e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(
            target: "botpod::deps",
            plugin_dir = %plugin_dir.display(),
            status = ?output.status.code(),
            stdout = %tail(&stdout, 2048),
            stderr = %tail(&stderr, 2048),
            "installer finished"
        );

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::operation(
                "installer",
                format!(
                    "exit status {:?}: {}",
                    output.status.code(),
                    tail(&stderr, 512)
                ),
            ))
        }
    }
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Decides and performs dependency installation per plugin directory.
///
/// Installs for the same directory are serialized; different directories
/// proceed independently.
pub struct DependencyManager {
    installer: Arc<dyn PackageInstaller>,
    locks: parking_lot::Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl DependencyManager {
    pub fn new(installer: Arc<dyn PackageInstaller>) -> Self {
        Self {
            installer,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, plugin_dir: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(plugin_dir.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Ensures the plugin directory's dependencies match its manifest,
    /// invoking the installer only on a fingerprint mismatch.
    pub async fn ensure_dependencies(&self, plugin_dir: &Path) -> Result<DepsOutcome> {
        let lock = self.lock_for(plugin_dir);
        let _guard = lock.lock().await;

        let manifest_path = plugin_dir.join(REQUIREMENTS_FILE_NAME);
        let manifest = ManifestSnapshot::read(&manifest_path)?;
        let mut state = read_deps_state(plugin_dir).unwrap_or_default();

        if state.requirements_hash.as_deref() == Some(manifest.fingerprint.as_str()) {
            debug!(
                target: "botpod::deps",
                plugin_dir = %plugin_dir.display(),
                fingerprint = %manifest.fingerprint,
                "dependencies up to date"
            );
            return Ok(DepsOutcome::UpToDate);
        }

        if !manifest.has_content {
            state.requirements_hash = Some(manifest.fingerprint);
            write_deps_state(plugin_dir, &state)?;
            return Ok(DepsOutcome::Recorded);
        }

        self.installer.install(&manifest_path, plugin_dir).await?;

        // The record must only ever claim a completed install.
        state.requirements_hash = Some(manifest.fingerprint.clone());
        write_deps_state(plugin_dir, &state)?;
        info!(
            target: "botpod::deps",
            plugin_dir = %plugin_dir.display(),
            fingerprint = %manifest.fingerprint,
            "dependencies installed"
        );
        Ok(DepsOutcome::Installed)
    }

    /// Writes the state record for a freshly installed plugin so the next
    /// startup check takes the fast path.
    pub async fn record_install(&self, plugin_dir: &Path) -> Result<()> {
        let lock = self.lock_for(plugin_dir);
        let _guard = lock.lock().await;

        let manifest_path = plugin_dir.join(REQUIREMENTS_FILE_NAME);
        let manifest = ManifestSnapshot::read(&manifest_path)?;
        let mut state = read_deps_state(plugin_dir).unwrap_or_default();
        state.requirements_hash = Some(manifest.fingerprint);
        write_deps_state(plugin_dir, &state)
    }
}

struct ManifestSnapshot {
    fingerprint: String,
    /// False for an absent, empty or whitespace-only manifest.
    has_content: bool,
}

impl ManifestSnapshot {
    fn read(manifest_path: &Path) -> Result<Self> {
        match std::fs::read(manifest_path) {
            Ok(bytes) => {
                let has_content = !bytes.iter().all(u8::is_ascii_whitespace);
                Ok(Self {
                    fingerprint: fingerprint_bytes(&bytes),
                    has_content,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self {
                fingerprint: empty_manifest_fingerprint(),
                has_content: false,
            }),
            // Unreadable-but-present is a real failure, not "no dependencies".
            Err(e) => Err(Error::io_at(manifest_path, e)),
        }
    }
}

/// SHA-256 of the manifest's raw bytes, lowercase hex.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Fingerprint recorded for a missing manifest, identical to that of an
/// empty file.
pub fn empty_manifest_fingerprint() -> String {
    fingerprint_bytes(&[])
}

pub fn deps_state_path(plugin_dir: &Path) -> PathBuf {
    plugin_dir.join(DEPS_STATE_FILE_NAME)
}

/// Reads the state record. Absent or unparsable records both come back as
/// `None` and force a reinstall on the next check.
pub fn read_deps_state(plugin_dir: &Path) -> Option<DepsState> {
    let path = deps_state_path(plugin_dir);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(
                target: "botpod::deps",
                path = %path.display(),
                "unreadable deps state treated as absent: {e}"
            );
            return None;
        }
    };
    match serde_json::from_str::<DepsState>(&text) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(
                target: "botpod::deps",
                path = %path.display(),
                "corrupt deps state treated as absent: {e}"
            );
            None
        }
    }
}

/// Writes the state record atomically (temp file then rename) so a crash
/// mid-write never leaves a record claiming a completed install.
pub fn write_deps_state(plugin_dir: &Path, state: &DepsState) -> Result<()> {
    let path = deps_state_path(plugin_dir);
    let text = serde_json::to_string_pretty(state)?;
    let mut temp = tempfile::NamedTempFile::new_in(plugin_dir).map_err(|e| Error::io_at(plugin_dir, e))?;
    temp.write_all(text.as_bytes())
        .map_err(|e| Error::io_at(&path, e))?;
    temp.persist(&path)
        .map_err(|e| Error::io_at(&path, e.error))?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/deps_tests.rs"]
mod tests;
