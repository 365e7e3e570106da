use std::sync::Arc;

use super::{factory::ModuleFactories, registry::ModuleRegistry};
use crate::{
    config::RuntimeConfig,
    error::ModuleError,
    events::EventBus,
    module::{BehaviorRef, ModuleConfig},
    repository::{ConfigRepository, InMemoryConfigRepository},
};

/// Builder for constructing a [`ModuleRegistry`] with optional collaborators.
pub struct RegistryBuilder {
    cfg: RuntimeConfig,
    bus: Option<EventBus>,
    factories: ModuleFactories,
    repository: Option<Arc<dyn ConfigRepository>>,
}

impl RegistryBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: RuntimeConfig) -> Self {
        Self {
            cfg,
            bus: None,
            factories: ModuleFactories::new(),
            repository: None,
        }
    }

    /// Uses an existing bus instead of creating a private one.
    ///
    /// Pass the process-wide bus so modules and external listeners share channels.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Sets the configuration repository (defaults to an empty in-memory one).
    pub fn with_repository(mut self, repository: Arc<dyn ConfigRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Registers a factory for `class`.
    pub fn with_factory<F>(mut self, class: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ModuleConfig) -> Result<BehaviorRef, ModuleError> + Send + Sync + 'static,
    {
        self.factories.register(class, factory);
        self
    }

    /// Replaces the whole factory map.
    pub fn with_factories(mut self, factories: ModuleFactories) -> Self {
        self.factories = factories;
        self
    }

    /// Builds and returns the registry.
    ///
    /// The registry subscribes its state tracker to the bus right away.
    pub fn build(self) -> Arc<ModuleRegistry> {
        let bus = self.bus.unwrap_or_default();
        let repository = self
            .repository
            .unwrap_or_else(|| Arc::new(InMemoryConfigRepository::new()));
        ModuleRegistry::new_internal(self.cfg, bus, self.factories, repository)
    }
}
