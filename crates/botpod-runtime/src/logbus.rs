//! Shared bus for worker log lines.
//!
//! Worker stderr and explicit `log` frames are published here; the debug
//! channel's `subscribe_logs` operation streams from it. Slow subscribers
//! lag and drop lines rather than backpressure the workers.

use tokio::sync::broadcast;

const LOG_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub plugin_id: String,
    pub line: String,
}

#[derive(Clone)]
pub struct LogBus {
    tx: broadcast::Sender<LogLine>,
}

impl LogBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(LOG_BUS_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, plugin_id: &str, line: impl Into<String>) {
        // No subscribers is fine; send only fails when nobody listens.
        let _ = self.tx.send(LogLine {
            plugin_id: plugin_id.to_string(),
            line: line.into(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.tx.subscribe()
    }
}

impl Default for LogBus {
    fn default() -> Self {
        Self::new()
    }
}
