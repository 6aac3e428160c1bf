//! Wire protocol shared by the orchestrator, its control/debug channels and
//! plugin workers.
//!
//! Every transport (process pipes and TCP sockets alike) carries
//! newline-delimited JSON frames. Host-facing conversations use the
//! [`ActionRequest`]/[`ActionResponse`] envelope; the private link between
//! the orchestrator and a worker process uses [`HostMessage`] and
//! [`WorkerMessage`].

mod frame;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use frame::{
    read_frame, read_frame_line, write_frame, FrameError, FrameReader, MAX_FRAME_BYTES,
};

pub const RESPONSE_CODE_OK: i32 = 0;
pub const RESPONSE_CODE_ERROR: i32 = 1;

/// Sequence id used for server-initiated push frames (log stream).
pub const PUSH_SEQ_ID: i64 = -1;

/// Action names accepted on the control channel.
pub mod actions {
    pub const PING: &str = "ping";
    pub const LIST_PLUGINS: &str = "list_plugins";
    pub const EMIT_EVENT: &str = "emit_event";
    pub const INSTALL_PLUGIN: &str = "install_plugin";
    pub const UNINSTALL_PLUGIN: &str = "uninstall_plugin";

    // Debug-channel additions.
    pub const RELOAD_PLUGIN: &str = "reload_plugin";
    pub const SUBSCRIBE_LOGS: &str = "subscribe_logs";

    /// Push frame emitted by the server for an active log subscription.
    pub const LOG: &str = "log";
}

/// Request envelope: `{"seq_id": 1, "action": "ping", "data": {}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionRequest {
    pub seq_id: i64,
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

impl ActionRequest {
    pub fn new(seq_id: i64, action: impl Into<String>, data: Value) -> Self {
        Self {
            seq_id,
            action: action.into(),
            data,
        }
    }
}

/// Response envelope: `{"seq_id": 1, "code": 0, "message": "ok", "data": {}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionResponse {
    pub seq_id: i64,
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl ActionResponse {
    pub fn success(seq_id: i64, data: Value) -> Self {
        Self {
            seq_id,
            code: RESPONSE_CODE_OK,
            message: "ok".to_string(),
            data,
        }
    }

    pub fn error(seq_id: i64, message: impl Into<String>) -> Self {
        Self {
            seq_id,
            code: RESPONSE_CODE_ERROR,
            message: message.into(),
            data: Value::Object(Map::new()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == RESPONSE_CODE_OK
    }
}

/// Push frame carrying one line of a log subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogPush {
    pub plugin_id: String,
    pub line: String,
}

/// Lifecycle of a plugin as tracked by the registry and reported over the
/// control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    Discovered,
    Installing,
    Ready,
    Running,
    Crashed,
    Stopped,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginState::Discovered => "discovered",
            PluginState::Installing => "installing",
            PluginState::Ready => "ready",
            PluginState::Running => "running",
            PluginState::Crashed => "crashed",
            PluginState::Stopped => "stopped",
        }
    }
}

/// One `list_plugins` row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginBrief {
    pub id: String,
    pub name: String,
    pub version: String,
    pub state: PluginState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// `emit_event` request data. A missing target selects broadcast delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmitEventParams {
    pub event: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Per-target outcome of one event delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Ok {
        #[serde(default)]
        payload: Value,
    },
    Unavailable,
    Timeout,
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventDelivery {
    pub plugin_id: String,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
}

/// Aggregated `emit_event` response data.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmitEventResult {
    pub results: Vec<EventDelivery>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallPluginParams {
    /// Path to a plugin directory or `.zip` artifact on the orchestrator host.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UninstallPluginParams {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReloadPluginParams {
    pub id: String,
}

/// Frames sent by the orchestrator to a worker over its private link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    Event {
        seq: u64,
        payload: Value,
    },
    Shutdown,
}

/// Frames sent by a worker to the orchestrator.
///
/// The first frame a worker emits after startup must be `hello`; the
/// orchestrator does not consider the worker running until it arrives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Hello {
        id: String,
        name: String,
        version: String,
    },
    Heartbeat,
    EventResult {
        seq: u64,
        #[serde(default)]
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Log {
        #[serde(default)]
        level: Option<String>,
        message: String,
    },
}
