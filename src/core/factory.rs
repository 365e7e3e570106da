//! # Module factories keyed by class tag.
//!
//! The registry instantiates behaviors by looking up `ModuleConfig::module_class`
//! in a [`ModuleFactories`] map populated at startup by whatever module
//! implementations are compiled in.
//!
//! ```text
//! "nmea-gps"   ──► |cfg| Ok(Arc::new(NmeaGps::from(cfg)))
//! "sqlite-db"  ──► |cfg| Ok(Arc::new(SqliteStorage::open(cfg)?))
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ModuleError;
use crate::module::{BehaviorRef, ModuleBehavior, ModuleConfig};

/// Creates a behavior from its configuration.
pub type ModuleFactory = Arc<dyn Fn(&ModuleConfig) -> Result<BehaviorRef, ModuleError> + Send + Sync>;

/// Map from class tag to factory.
#[derive(Clone, Default)]
pub struct ModuleFactories {
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleFactories {
    /// Creates an empty factory map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `class`, replacing any previous one.
    pub fn register<F>(&mut self, class: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ModuleConfig) -> Result<BehaviorRef, ModuleError> + Send + Sync + 'static,
    {
        self.factories.insert(class.into(), Arc::new(factory));
        self
    }

    /// Registers a factory for a behavior that needs no configuration to be built.
    pub fn register_default<B>(&mut self, class: impl Into<String>) -> &mut Self
    where
        B: ModuleBehavior + Default,
    {
        self.register(class, |_| Ok(Arc::new(B::default()) as BehaviorRef))
    }

    /// Returns the factory for `class`.
    pub fn get(&self, class: &str) -> Option<&ModuleFactory> {
        self.factories.get(class)
    }

    /// Returns whether a factory is registered for `class`.
    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    /// Registered class tags, sorted.
    pub fn classes(&self) -> Vec<String> {
        let mut classes: Vec<String> = self.factories.keys().cloned().collect();
        classes.sort_unstable();
        classes
    }
}

impl fmt::Debug for ModuleFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleFactories")
            .field("classes", &self.classes())
            .finish()
    }
}
