use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Transport serving the primary control channel. Chosen once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ControlTransport {
    /// Frames over the daemon's own stdin/stdout (same-machine pipe use).
    Stdio,
    /// Frames over a TCP socket.
    Tcp { bind: String },
}

impl Default for ControlTransport {
    fn default() -> Self {
        ControlTransport::Tcp {
            bind: default_control_bind(),
        }
    }
}

/// Secondary development endpoint. Off unless explicitly enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_debug_bind")]
    pub bind: String,
}

impl Default for DebugChannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_debug_bind(),
        }
    }
}

/// External package installer invocation. `{manifest}` and `{dir}` are
/// substituted with the manifest path and the plugin directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerConfig {
    #[serde(default = "default_installer_command")]
    pub command: Vec<String>,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            command: default_installer_command(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicyConfig {
    /// Restart attempts allowed within one rolling window before the plugin
    /// is left `stopped`.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_restart_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_restart_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_restart_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

impl Default for RestartPolicyConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            window_ms: default_restart_window_ms(),
            backoff_ms: default_restart_backoff_ms(),
            backoff_cap_ms: default_restart_backoff_cap_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_plugin_root")]
    pub plugin_root: PathBuf,
    #[serde(default)]
    pub control: ControlTransport,
    #[serde(default)]
    pub debug: DebugChannelConfig,
    #[serde(default)]
    pub installer: InstallerConfig,
    #[serde(default)]
    pub restart: RestartPolicyConfig,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_grace_ms")]
    pub heartbeat_grace_ms: u64,
    #[serde(default = "default_event_timeout_ms")]
    pub event_timeout_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            plugin_root: default_plugin_root(),
            control: ControlTransport::default(),
            debug: DebugChannelConfig::default(),
            installer: InstallerConfig::default(),
            restart: RestartPolicyConfig::default(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_grace_ms: default_heartbeat_grace_ms(),
            event_timeout_ms: default_event_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl RuntimeConfig {
    /// Loads a JSON config file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?;
        serde_json::from_str(&text).map_err(|e| Error::json_at(path, e))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_grace(&self) -> Duration {
        Duration::from_millis(self.heartbeat_grace_ms)
    }

    pub fn event_timeout(&self) -> Duration {
        Duration::from_millis(self.event_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_plugin_root() -> PathBuf {
    PathBuf::from("data/plugins")
}

fn default_control_bind() -> String {
    "127.0.0.1:5300".to_string()
}

fn default_debug_bind() -> String {
    "127.0.0.1:5301".to_string()
}

fn default_installer_command() -> Vec<String> {
    vec![
        "python3".to_string(),
        "-m".to_string(),
        "pip".to_string(),
        "install".to_string(),
        "-r".to_string(),
        "{manifest}".to_string(),
    ]
}

fn default_max_restarts() -> u32 {
    3
}

fn default_restart_window_ms() -> u64 {
    60_000
}

fn default_restart_backoff_ms() -> u64 {
    500
}

fn default_restart_backoff_cap_ms() -> u64 {
    30_000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_heartbeat_grace_ms() -> u64 {
    15_000
}

fn default_event_timeout_ms() -> u64 {
    10_000
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
