//! # Module configuration records.
//!
//! A [`ModuleConfig`] is an immutable snapshot handed to one init/start cycle.
//! It is plain serde data so any configuration repository can persist it.
//!
//! ```json
//! {
//!   "id": "gps-1",
//!   "name": "Rooftop GPS",
//!   "module_class": "nmea-gps",
//!   "enabled": true,
//!   "dependencies": [
//!     { "module_id": "serial-comm", "required_state": "STARTED" }
//!   ],
//!   "dependency_mode": "event_driven",
//!   "dependency_timeout_ms": 5000,
//!   "properties": { "baud": 4800 }
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ModuleError;
use crate::module::ModuleState;

/// How a module waits for its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyMode {
    /// Subscribe to the dependency's state topic; resume from the event.
    /// `request_*` always returns right after the transitional state is published.
    #[default]
    EventDriven,
    /// Look the dependency up in the registry and `wait_for_state` on it.
    PollWait,
}

/// Transition a dependency gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyPhase {
    #[default]
    Init,
    Start,
}

/// "Module `module_id` must be in `required_state` before my `phase` body runs."
///
/// A lookup key only: the referenced module may be unloaded at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDependency {
    pub module_id: String,
    pub required_state: ModuleState,
    #[serde(default)]
    pub phase: DependencyPhase,
}

impl ModuleDependency {
    pub fn new(module_id: impl Into<String>, required_state: ModuleState) -> Self {
        Self {
            module_id: module_id.into(),
            required_state,
            phase: DependencyPhase::Init,
        }
    }

    /// Makes the dependency gate `start` instead of `init`.
    pub fn before_start(mut self) -> Self {
        self.phase = DependencyPhase::Start;
        self
    }
}

/// Configuration of one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Stable local id. Empty means "assign one at load time".
    #[serde(default)]
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Factory tag used to pick the implementation.
    pub module_class: String,
    /// Initialize and start the module as soon as it is loaded.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub dependencies: Vec<ModuleDependency>,
    #[serde(default)]
    pub dependency_mode: DependencyMode,
    /// Bound on dependency resolution; `None` falls back to the runtime default.
    #[serde(default)]
    pub dependency_timeout_ms: Option<u64>,
    /// Implementation-specific settings.
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl ModuleConfig {
    /// Creates a disabled configuration without dependencies.
    pub fn new(id: impl Into<String>, module_class: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            module_class: module_class.into(),
            enabled: false,
            dependencies: Vec::new(),
            dependency_mode: DependencyMode::default(),
            dependency_timeout_ms: None,
            properties: serde_json::Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_dependency(mut self, dep: ModuleDependency) -> Self {
        self.dependencies.push(dep);
        self
    }

    pub fn with_dependency_mode(mut self, mode: DependencyMode) -> Self {
        self.dependency_mode = mode;
        self
    }

    pub fn with_dependency_timeout(mut self, timeout: Duration) -> Self {
        self.dependency_timeout_ms = Some(timeout.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Explicit dependency bound, if any.
    pub fn dependency_timeout(&self) -> Option<Duration> {
        self.dependency_timeout_ms.map(Duration::from_millis)
    }

    /// Dependencies gating `phase`, in declaration order.
    pub fn dependencies_for(&self, phase: DependencyPhase) -> Vec<ModuleDependency> {
        self.dependencies
            .iter()
            .filter(|d| d.phase == phase)
            .cloned()
            .collect()
    }

    /// Reads an integer property.
    pub fn property_u64(&self, key: &str) -> Option<u64> {
        self.properties.get(key).and_then(serde_json::Value::as_u64)
    }

    /// Reads a string property.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(serde_json::Value::as_str)
    }

    /// Checks the fields the runtime itself relies on.
    pub fn validate(&self) -> Result<(), ModuleError> {
        if self.module_class.trim().is_empty() {
            return Err(ModuleError::config("module_class is empty"));
        }
        for dep in &self.dependencies {
            if dep.module_id.trim().is_empty() {
                return Err(ModuleError::config("dependency with empty module id"));
            }
            if dep.module_id == self.id {
                return Err(ModuleError::config(format!(
                    "module '{}' depends on itself",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_with_defaults() {
        let cfg: ModuleConfig = serde_json::from_str(
            r#"{
                "id": "gps-1",
                "module_class": "nmea-gps",
                "dependencies": [{ "module_id": "serial", "required_state": "STARTED" }],
                "properties": { "baud": 4800 }
            }"#,
        )
        .unwrap();

        assert!(!cfg.enabled);
        assert_eq!(cfg.dependency_mode, DependencyMode::EventDriven);
        assert_eq!(cfg.dependencies[0].phase, DependencyPhase::Init);
        assert_eq!(cfg.dependencies[0].required_state, ModuleState::Started);
        assert_eq!(cfg.property_u64("baud"), Some(4800));
        assert_eq!(cfg.dependency_timeout(), None);
    }

    #[test]
    fn test_validate_rejects_self_dependency() {
        let cfg = ModuleConfig::new("a", "test")
            .with_dependency(ModuleDependency::new("a", ModuleState::Started));
        assert!(matches!(cfg.validate(), Err(ModuleError::Config { .. })));
    }

    #[test]
    fn test_validate_rejects_empty_class() {
        let cfg = ModuleConfig::new("a", " ");
        assert!(matches!(cfg.validate(), Err(ModuleError::Config { .. })));
        assert!(ModuleConfig::new("a", "test").validate().is_ok());
    }

    #[test]
    fn test_dependencies_split_by_phase() {
        let cfg = ModuleConfig::new("a", "test")
            .with_dependency(ModuleDependency::new("b", ModuleState::Initialized))
            .with_dependency(ModuleDependency::new("c", ModuleState::Started).before_start());

        let init = cfg.dependencies_for(DependencyPhase::Init);
        let start = cfg.dependencies_for(DependencyPhase::Start);
        assert_eq!(init.len(), 1);
        assert_eq!(init[0].module_id, "b");
        assert_eq!(start[0].module_id, "c");
    }
}
