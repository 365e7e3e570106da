//! # Module state tracker with sequence-based ordering.
//!
//! Maintains the registry's view of every module's last published state,
//! using event sequence numbers to reject out-of-order delivery.
//!
//! ## Architecture
//! ```text
//! Module ──► EventBus (topic "state") ──► StateTracker::on_event() ──► update()
//!                                                         │
//!                                                         ▼
//!                                         HashMap<String, Tracked>
//!                                        (local_id → {seq, state})
//! ```
//!
//! ## Rules
//! - `StateChanged` sets the state, `Loaded` resets it to `LOADED`, `Unloaded` forgets it
//! - Other events **update seq** but don't affect the state
//! - Events with `seq <= last_seq` are **rejected** (stale)
//! - Reads (`snapshot`, `state_of`) reflect every event delivered so far

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::events::{Event, EventKind};
use crate::listeners::EventListener;
use crate::module::ModuleState;

/// Per-module state for ordering validation.
#[derive(Debug, Clone)]
struct Tracked {
    /// Last seen sequence number for this module.
    last_seq: u64,
    /// Last known state; `None` once unloaded.
    state: Option<ModuleState>,
}

/// Thread-safe tracker of module states.
///
/// ### Responsibilities
/// - Provides the `module_states` view of the registry
/// - Reports modules that did not stop during graceful shutdown
/// - Rejects stale events using sequence numbers
#[derive(Debug, Default)]
pub struct StateTracker {
    state: RwLock<HashMap<String, Tracked>>,
}

impl StateTracker {
    /// Creates a new empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a lifecycle event if it is newer than the last one seen for its producer.
    ///
    /// ### Ordering guarantees
    /// ```text
    /// update(StateChanged{→STOPPED}, seq=100)  → STOPPED, last_seq=100
    /// update(StateChanged{→STARTED}, seq=99)   → rejected (stale)
    /// ```
    ///
    /// Returns `true` if the tracked state changed.
    pub fn update(&self, ev: &Event) -> bool {
        let mut state = self.state.write();
        let entry = state.entry(ev.producer.to_string()).or_insert(Tracked {
            last_seq: 0,
            state: None,
        });

        if ev.seq <= entry.last_seq {
            return false;
        }
        entry.last_seq = ev.seq;
        let next = match ev.kind {
            EventKind::StateChanged { new, .. } => Some(new),
            EventKind::Loaded => Some(ModuleState::Loaded),
            EventKind::Unloaded => None,
            _ => return false,
        };
        let changed = entry.state != next;
        entry.state = next;
        changed
    }

    /// Returns `(local_id, state)` of every tracked module, sorted by id.
    pub fn snapshot(&self) -> Vec<(String, ModuleState)> {
        let state = self.state.read();
        let mut out: Vec<(String, ModuleState)> = state
            .iter()
            .filter_map(|(id, t)| t.state.map(|s| (id.clone(), s)))
            .collect();
        out.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Returns the last known state of a module.
    pub fn state_of(&self, id: &str) -> Option<ModuleState> {
        self.state.read().get(id).and_then(|t| t.state)
    }

    /// Returns sorted ids of tracked modules that are neither `STOPPED` nor `LOADED`.
    pub fn not_stopped(&self) -> Vec<String> {
        let state = self.state.read();
        let mut ids: Vec<String> = state
            .iter()
            .filter(|(_, t)| {
                t.state
                    .is_some_and(|s| !matches!(s, ModuleState::Stopped | ModuleState::Loaded))
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl EventListener for StateTracker {
    fn on_event(&self, event: &Event) {
        self.update(event);
    }

    fn name(&self) -> &str {
        "state-tracker"
    }
}
