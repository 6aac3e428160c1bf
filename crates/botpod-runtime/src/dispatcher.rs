//! Routes inbound events to worker processes and aggregates their results.

use std::sync::Arc;

use botpod_protocol::{EmitEventParams, EmitEventResult, EventDelivery};
use futures_util::future::join_all;

use crate::registry::PluginRegistry;
use crate::supervisor::Supervisor;

pub struct EventDispatcher {
    registry: Arc<PluginRegistry>,
    supervisor: Arc<Supervisor>,
}

impl EventDispatcher {
    pub fn new(registry: Arc<PluginRegistry>, supervisor: Arc<Supervisor>) -> Self {
        Self {
            registry,
            supervisor,
        }
    }

    /// Delivers the event to the selected target or to every known plugin.
    /// Targets are never short-circuited: each one yields exactly one
    /// outcome and deliveries run concurrently, each under its own timeout.
    pub async fn emit_event(&self, params: EmitEventParams) -> EmitEventResult {
        let targets = match &params.target {
            Some(id) => vec![id.clone()],
            None => self.registry.ids().await,
        };

        let deliveries = targets.into_iter().map(|plugin_id| {
            let payload = params.event.clone();
            let supervisor = Arc::clone(&self.supervisor);
            async move {
                let outcome = supervisor.deliver_event(&plugin_id, payload).await;
                EventDelivery { plugin_id, outcome }
            }
        });

        EmitEventResult {
            results: join_all(deliveries).await,
        }
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
