//! On-disk plugin descriptor and plugin-root scanning.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

pub const DESCRIPTOR_FILE_NAME: &str = "plugin.yaml";

/// Command line that starts the plugin's worker process, run with the
/// plugin directory as working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    #[serde(default)]
    pub author: Option<String>,
    pub version: String,
    pub entry: EntryPoint,
}

impl PluginDescriptor {
    /// Stable plugin identifier: `author__name`, or just `name` when no
    /// author is declared.
    pub fn plugin_id(&self) -> String {
        match self.author.as_deref().map(str::trim) {
            Some(author) if !author.is_empty() => format!("{author}__{}", self.name.trim()),
            _ => self.name.trim().to_string(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_input("descriptor name is empty"));
        }
        if self.version.trim().is_empty() {
            return Err(Error::invalid_input("descriptor version is empty"));
        }
        if self.entry.command.trim().is_empty() {
            return Err(Error::invalid_input("descriptor entry command is empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub id: String,
    pub dir: PathBuf,
    pub descriptor: PluginDescriptor,
}

#[derive(Debug, Clone)]
pub struct SkippedDir {
    pub dir: PathBuf,
    pub reason: String,
}

/// Result of one plugin-root scan. Malformed entries never fail the scan;
/// they are reported here instead.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub discovered: Vec<DiscoveredPlugin>,
    pub skipped: Vec<SkippedDir>,
}

pub fn descriptor_path(plugin_dir: &Path) -> PathBuf {
    plugin_dir.join(DESCRIPTOR_FILE_NAME)
}

pub fn read_descriptor(plugin_dir: &Path) -> Result<PluginDescriptor> {
    let path = descriptor_path(plugin_dir);
    let text = std::fs::read_to_string(&path).map_err(|e| Error::io_at(&path, e))?;
    let descriptor: PluginDescriptor =
        serde_yaml::from_str(&text).map_err(|e| Error::yaml_at(&path, e))?;
    descriptor.validate()?;
    Ok(descriptor)
}

/// Scans the immediate subdirectories of `root` for plugin descriptors.
/// A missing root is an empty report, not an error.
pub fn scan_plugin_root(root: &Path) -> Result<ScanReport> {
    let mut report = ScanReport::default();
    if !root.exists() {
        return Ok(report);
    }

    let entries = std::fs::read_dir(root).map_err(|e| Error::io_at(root, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io_at(root, e))?;
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        match read_descriptor(&dir) {
            Ok(descriptor) => {
                report.discovered.push(DiscoveredPlugin {
                    id: descriptor.plugin_id(),
                    dir,
                    descriptor,
                });
            }
            Err(e) => {
                warn!(
                    target: "botpod::discover",
                    dir = %dir.display(),
                    "skipping plugin directory: {e}"
                );
                report.skipped.push(SkippedDir {
                    dir,
                    reason: e.to_string(),
                });
            }
        }
    }

    report.discovered.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(report)
}

#[cfg(test)]
#[path = "tests/descriptor_tests.rs"]
mod tests;
