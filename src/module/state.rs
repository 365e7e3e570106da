//! # Module lifecycle states.
//!
//! ```text
//!            request_init              request_start              request_stop
//! LOADED ──► INITIALIZING ──► INITIALIZED ──► STARTING ──► STARTED ──► STOPPING ──► STOPPED
//!   ▲             │                                │                       │           │
//!   │             ▼                                ▼                       ▼           │
//!   │           FAILED ◄───────────────────────────┘        (stop errors still STOPPED)│
//!   │             │                                                                    │
//!   └─────────────┴──────────── request_init (re-entrant cycle) ◄──────────────────────┘
//! ```
//!
//! States are compared by equality only; there is no numeric ordering.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleState {
    /// Created from a configuration, nothing executed yet.
    Loaded,
    /// `init` body (or its dependency wait) in flight.
    Initializing,
    /// `init` completed.
    Initialized,
    /// `start` body (or its dependency wait) in flight.
    Starting,
    /// Running.
    Started,
    /// `stop` body in flight.
    Stopping,
    /// Stopped; may be initialized again.
    Stopped,
    /// `init` or `start` failed; may be initialized again.
    Failed,
}

impl ModuleState {
    /// True for states in which a lifecycle body or dependency wait is in flight.
    #[inline]
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            ModuleState::Initializing | ModuleState::Starting | ModuleState::Stopping
        )
    }

    /// Returns whether a module in `self` fulfils a dependency on `required`.
    ///
    /// Equality, plus: a starting or started module still counts as initialized.
    #[inline]
    pub fn satisfies(self, required: ModuleState) -> bool {
        self == required
            || (required == ModuleState::Initialized
                && matches!(self, ModuleState::Starting | ModuleState::Started))
    }

    /// Returns whether observing a transition into `self` ends a wait for `target`.
    ///
    /// `FAILED` and `STOPPED` need a new request before any other state can follow.
    #[inline]
    pub(crate) fn aborts_wait_for(self, target: ModuleState) -> bool {
        self != target && matches!(self, ModuleState::Failed | ModuleState::Stopped)
    }

    /// Upper-case name used in logs and `Display`.
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleState::Loaded => "LOADED",
            ModuleState::Initializing => "INITIALIZING",
            ModuleState::Initialized => "INITIALIZED",
            ModuleState::Starting => "STARTING",
            ModuleState::Started => "STARTED",
            ModuleState::Stopping => "STOPPING",
            ModuleState::Stopped => "STOPPED",
            ModuleState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle body being executed; carried by execution errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Init,
    Start,
    Stop,
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Init => "init",
            Phase::Start => "start",
            Phase::Stop => "stop",
            Phase::Cleanup => "cleanup",
        })
    }
}
