//! # LogWriter: event renderer
//!
//! A listener that renders incoming [`Event`]s through `tracing`.
//! Register it as a topic-wide listener to trace a whole hub.
//!
//! ## Example output
//! ```text
//! INFO state: module="gps-1" from=LOADED to=INITIALIZING
//! INFO state: module="gps-1" from=INITIALIZING to=INITIALIZED
//! INFO status: module="gps-1" message="fix acquired"
//! DEBUG data: module="gps-1" topic="data" payload={"lat":1.5}
//! INFO unloaded: module="gps-1"
//! ```

use tracing::{debug, info};

use crate::events::{Event, EventKind};
use crate::listeners::EventListener;

/// Event writer listener.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl EventListener for LogWriter {
    fn on_event(&self, e: &Event) {
        match &e.kind {
            EventKind::StateChanged { old, new } => {
                info!(module = %e.producer, from = %old, to = %new, "state");
            }
            EventKind::StatusChanged { message } => {
                info!(module = %e.producer, message = %message, "status");
            }
            EventKind::ConfigChanged => {
                info!(module = %e.producer, "config-changed");
            }
            EventKind::Loaded => {
                info!(module = %e.producer, "loaded");
            }
            EventKind::Unloaded => {
                info!(module = %e.producer, "unloaded");
            }
            EventKind::Data { payload } => {
                debug!(module = %e.producer, topic = %e.topic, payload = %payload, "data");
            }
        }
    }

    fn name(&self) -> &str {
        "LogWriter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleState;

    #[test]
    fn test_renders_every_kind_without_panicking() {
        let w = LogWriter::new();
        w.on_event(&Event::state_changed("m", ModuleState::Loaded, ModuleState::Initializing));
        w.on_event(&Event::new("m", "state", EventKind::Loaded));
        w.on_event(&Event::new(
            "m",
            "data",
            EventKind::Data {
                payload: serde_json::json!([1, 2]),
            },
        ));
    }
}
