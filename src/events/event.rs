//! # Events published on the bus by modules and the registry.
//!
//! The [`EventKind`] enum classifies event payloads:
//! - **Lifecycle events**: state changes, status messages, configuration changes
//! - **Registry events**: module loaded / unloaded
//! - **Domain events**: arbitrary data produced by a module
//!
//! The [`Event`] struct carries the producer id, topic, timestamp and a global
//! sequence number around the payload.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Events of one producer are delivered in publish order; there is no ordering across
//! producers, `seq` can be used to reconstruct one.
//!
//! ## Example
//! ```rust
//! use hubvisor::{Event, EventKind, ModuleState, STATE_TOPIC};
//!
//! let ev = Event::new(
//!     "gps-1",
//!     STATE_TOPIC,
//!     EventKind::StateChanged { old: ModuleState::Loaded, new: ModuleState::Initializing },
//! );
//!
//! assert_eq!(&*ev.producer, "gps-1");
//! assert_eq!(ev.new_state(), Some(ModuleState::Initializing));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::module::ModuleState;

/// Topic carrying every lifecycle event of a module.
pub const STATE_TOPIC: &str = "state";

/// Conventional topic for domain data produced by a module.
pub const DATA_TOPIC: &str = "data";

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Payload of an [`Event`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Module moved from `old` to `new`. Never published with `old == new`.
    StateChanged {
        old: ModuleState,
        new: ModuleState,
    },

    /// Module updated its human-readable status message.
    StatusChanged {
        message: Arc<str>,
    },

    /// Module configuration was replaced.
    ConfigChanged,

    /// Registry loaded the module.
    Loaded,

    /// Registry unloaded the module; later lookups of the producer return nothing.
    Unloaded,

    /// Domain payload (e.g. a new sensor record).
    Data {
        payload: serde_json::Value,
    },
}

/// Bus event with producer metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - `producer`: id of the producing module (never a reference to it)
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Producer id, usually a module's local id.
    pub producer: Arc<str>,
    /// Topic within the producer.
    pub topic: Arc<str>,
    /// Event payload.
    pub kind: EventKind,
}

impl Event {
    /// Creates a new event with current timestamp and next sequence number.
    pub fn new(producer: impl Into<Arc<str>>, topic: impl Into<Arc<str>>, kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            producer: producer.into(),
            topic: topic.into(),
            kind,
        }
    }

    /// Creates a state-change event on [`STATE_TOPIC`].
    #[inline]
    pub fn state_changed(producer: impl Into<Arc<str>>, old: ModuleState, new: ModuleState) -> Self {
        Event::new(producer, STATE_TOPIC, EventKind::StateChanged { old, new })
    }

    /// Returns the new state if this is a state-change event.
    #[inline]
    pub fn new_state(&self) -> Option<ModuleState> {
        match self.kind {
            EventKind::StateChanged { new, .. } => Some(new),
            _ => None,
        }
    }

    #[inline]
    pub fn is_state_change(&self) -> bool {
        matches!(self.kind, EventKind::StateChanged { .. })
    }
}
