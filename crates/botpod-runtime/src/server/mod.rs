//! Host-facing control and debug channel servers.

mod handlers;
mod session;
mod transport;

use std::sync::Arc;

pub use session::serve_session;
pub use transport::{serve_stdio_control, serve_tcp};

use crate::deps::DependencyManager;
use crate::dispatcher::EventDispatcher;
use crate::logbus::LogBus;
use crate::registry::PluginRegistry;
use crate::supervisor::Supervisor;

/// Which action set a session is allowed to use. The debug channel is a
/// superset of the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Control,
    Debug,
}

/// Everything a channel session needs to serve requests.
#[derive(Clone)]
pub struct ChannelContext {
    pub registry: Arc<PluginRegistry>,
    pub supervisor: Arc<Supervisor>,
    pub dispatcher: Arc<EventDispatcher>,
    pub deps: Arc<DependencyManager>,
    pub logbus: LogBus,
}
