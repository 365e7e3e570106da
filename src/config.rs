//! # Global runtime configuration.
//!
//! Provides [`RuntimeConfig`] centralized settings for the module runtime.
//!
//! Config is used in two ways:
//! 1. **Registry creation**: `ModuleRegistry::builder(config)`
//! 2. **Module defaults**: every module created by the registry inherits the
//!    dependency bound, poll period and transition buffer from it.
//!
//! ## Sentinel values
//! - `dependency_timeout = 0s` → wait for dependencies forever
//! - `shutdown_grace = 0s` → do not wait for modules to stop during shutdown

use std::time::Duration;

/// Global configuration for the module runtime.
///
/// ## Field semantics
/// - `shutdown_grace`: Maximum wait for modules to stop on `ModuleRegistry::shutdown`
/// - `dependency_timeout`: Default dependency bound when a module config gives none (`0s` = forever)
/// - `dependency_poll_interval`: Period of registry re-checks in poll-wait mode
/// - `transition_capacity`: Per-module transition buffer used by `wait_for_state` (min 1)
///
/// ## Notes
/// All fields are public for flexibility. Prefer using helper accessors to avoid
/// sprinkling sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Maximum time to wait for all modules to stop during shutdown.
    pub shutdown_grace: Duration,

    /// Default bound on dependency resolution.
    ///
    /// - `Duration::ZERO` = wait until the dependency shows up
    /// - `> 0` = the module reverts to its pre-request state once elapsed
    pub dependency_timeout: Duration,

    /// How often poll-wait resolution re-checks the registry for a dependency
    /// that is not loaded yet.
    pub dependency_poll_interval: Duration,

    /// Capacity of each module's transition broadcast.
    ///
    /// Waiters that lag behind more than this many transitions fall back to
    /// reading the current state.
    pub transition_capacity: usize,
}

impl RuntimeConfig {
    /// Returns the default dependency bound as an `Option`.
    ///
    /// - `None` → no bound
    /// - `Some(d)` → revert after `d`
    #[inline]
    pub fn default_dependency_timeout(&self) -> Option<Duration> {
        if self.dependency_timeout == Duration::ZERO {
            None
        } else {
            Some(self.dependency_timeout)
        }
    }

    /// Returns the poll period clamped to a minimum of 1ms.
    #[inline]
    pub fn poll_interval_clamped(&self) -> Duration {
        self.dependency_poll_interval.max(Duration::from_millis(1))
    }

    /// Returns a transition capacity clamped to a minimum of 1.
    #[inline]
    pub fn transition_capacity_clamped(&self) -> usize {
        self.transition_capacity.max(1)
    }
}

impl Default for RuntimeConfig {
    /// Default configuration:
    ///
    /// - `shutdown_grace = 30s`
    /// - `dependency_timeout = 0s` (no bound)
    /// - `dependency_poll_interval = 100ms`
    /// - `transition_capacity = 64`
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(30),
            dependency_timeout: Duration::ZERO,
            dependency_poll_interval: Duration::from_millis(100),
            transition_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_dependency_timeout_means_unbounded() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.default_dependency_timeout(), None);

        let cfg = RuntimeConfig {
            dependency_timeout: Duration::from_secs(2),
            ..RuntimeConfig::default()
        };
        assert_eq!(cfg.default_dependency_timeout(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_clamped_accessors() {
        let cfg = RuntimeConfig {
            dependency_poll_interval: Duration::ZERO,
            transition_capacity: 0,
            ..RuntimeConfig::default()
        };
        assert_eq!(cfg.poll_interval_clamped(), Duration::from_millis(1));
        assert_eq!(cfg.transition_capacity_clamped(), 1);
    }
}
