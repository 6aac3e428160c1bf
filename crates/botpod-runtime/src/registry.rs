//! In-memory catalog of known plugins.
//!
//! The filesystem stays the source of truth; the registry is rebuilt from a
//! plugin-root scan on startup and kept current across install/uninstall and
//! lifecycle transitions. Reads are concurrent, structural mutations are
//! serialized behind the write lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use botpod_protocol::{PluginBrief, PluginState};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::artifact::{copy_dir_recursive, stage_plugin_source};
use crate::deps::DependencyManager;
use crate::descriptor::{read_descriptor, scan_plugin_root, EntryPoint, ScanReport};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct PluginRecord {
    pub id: String,
    pub name: String,
    pub version: String,
    pub author: Option<String>,
    pub dir: PathBuf,
    pub entry: EntryPoint,
    pub state: PluginState,
    pub last_error: Option<String>,
}

impl PluginRecord {
    pub fn brief(&self) -> PluginBrief {
        PluginBrief {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            state: self.state,
            last_error: self.last_error.clone(),
        }
    }
}

pub struct PluginRegistry {
    root: PathBuf,
    records: RwLock<HashMap<String, PluginRecord>>,
    // Serializes install/uninstall across concurrent sessions; the conflict
    // check and the copy into the plugin root must be one atomic step.
    install_lock: tokio::sync::Mutex<()>,
}

impl PluginRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            records: RwLock::new(HashMap::new()),
            install_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rebuilds the catalog from a plugin-root scan. Records already known
    /// keep their runtime state; records whose directory vanished are
    /// dropped unless a worker is still running.
    pub async fn discover(&self) -> Result<ScanReport> {
        let report = scan_plugin_root(&self.root)?;
        let mut records = self.records.write().await;

        for discovered in &report.discovered {
            match records.get_mut(&discovered.id) {
                Some(record) => {
                    record.name = discovered.descriptor.name.clone();
                    record.version = discovered.descriptor.version.clone();
                    record.author = discovered.descriptor.author.clone();
                    record.entry = discovered.descriptor.entry.clone();
                    record.dir = discovered.dir.clone();
                }
                None => {
                    records.insert(
                        discovered.id.clone(),
                        PluginRecord {
                            id: discovered.id.clone(),
                            name: discovered.descriptor.name.clone(),
                            version: discovered.descriptor.version.clone(),
                            author: discovered.descriptor.author.clone(),
                            dir: discovered.dir.clone(),
                            entry: discovered.descriptor.entry.clone(),
                            state: PluginState::Discovered,
                            last_error: None,
                        },
                    );
                }
            }
        }

        let on_disk: std::collections::HashSet<&str> =
            report.discovered.iter().map(|d| d.id.as_str()).collect();
        records.retain(|id, record| {
            if on_disk.contains(id.as_str()) || record.state == PluginState::Running {
                true
            } else {
                warn!(
                    target: "botpod::registry",
                    plugin_id = %id,
                    "dropping record for vanished plugin directory"
                );
                false
            }
        });

        info!(
            target: "botpod::registry",
            discovered = report.discovered.len(),
            skipped = report.skipped.len(),
            "plugin root scanned"
        );
        Ok(report)
    }

    /// Installs a plugin from a local directory or zip artifact, runs the
    /// dependency install, and registers it `discovered`. The worker is not
    /// launched here.
    pub async fn install(&self, deps: &DependencyManager, source: &Path) -> Result<PluginRecord> {
        let _install_guard = self.install_lock.lock().await;

        let staging = tempfile::tempdir().map_err(Error::Io)?;
        stage_plugin_source(source, staging.path())?;

        let descriptor = read_descriptor(staging.path())?;
        let id = descriptor.plugin_id();

        let target_dir = self.root.join(&id);
        {
            let records = self.records.read().await;
            if records.contains_key(&id) {
                return Err(Error::conflict("plugin", id));
            }
        }
        if target_dir.exists() {
            return Err(Error::conflict("plugin directory", target_dir.display().to_string()));
        }

        std::fs::create_dir_all(&self.root).map_err(|e| Error::io_at(&self.root, e))?;
        copy_dir_recursive(staging.path(), &target_dir)?;

        deps.ensure_dependencies(&target_dir).await?;
        deps.record_install(&target_dir).await?;

        let record = PluginRecord {
            id: id.clone(),
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            author: descriptor.author.clone(),
            dir: target_dir,
            entry: descriptor.entry.clone(),
            state: PluginState::Discovered,
            last_error: None,
        };

        let mut records = self.records.write().await;
        records.insert(id.clone(), record.clone());
        info!(
            target: "botpod::registry",
            plugin_id = %id,
            version = %record.version,
            dir = %record.dir.display(),
            "plugin installed"
        );
        Ok(record)
    }

    /// Drops the record and deletes the plugin directory (state record
    /// included). The caller is responsible for stopping a running worker
    /// first.
    pub async fn remove_and_delete(&self, id: &str) -> Result<PluginRecord> {
        let _install_guard = self.install_lock.lock().await;

        let mut records = self.records.write().await;
        let record = records
            .remove(id)
            .ok_or_else(|| Error::not_found("plugin", id))?;
        drop(records);

        if record.dir.exists() {
            std::fs::remove_dir_all(&record.dir).map_err(|e| Error::io_at(&record.dir, e))?;
        }
        info!(target: "botpod::registry", plugin_id = %id, "plugin uninstalled");
        Ok(record)
    }

    pub async fn get(&self, id: &str) -> Option<PluginRecord> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.records.read().await.contains_key(id)
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn snapshot(&self) -> Vec<PluginRecord> {
        let mut records: Vec<PluginRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// The `list_plugins` view, failed plugins included.
    pub async fn briefs(&self) -> Vec<PluginBrief> {
        self.snapshot().await.iter().map(PluginRecord::brief).collect()
    }

    pub async fn set_state(&self, id: &str, state: PluginState) {
        self.transition(id, state, None).await;
    }

    pub async fn set_failed(&self, id: &str, state: PluginState, error: impl Into<String>) {
        self.transition(id, state, Some(error.into())).await;
    }

    async fn transition(&self, id: &str, state: PluginState, error: Option<String>) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(id) {
            record.state = state;
            record.last_error = error;
        }
    }

    #[cfg(test)]
    pub(crate) async fn insert_for_tests(&self, record: PluginRecord) {
        self.records.write().await.insert(record.id.clone(), record);
    }
}

impl PluginRegistry {
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
