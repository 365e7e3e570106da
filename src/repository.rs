//! # Configuration repository.
//!
//! The registry persists module configurations through a [`ConfigRepository`].
//! Calls are synchronous and failures surface as
//! [`RegistryError::Repository`](crate::RegistryError::Repository).
//!
//! [`InMemoryConfigRepository`] keeps everything in a map; file or database
//! backed stores implement the same trait.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::RepositoryError;
use crate::module::ModuleConfig;

/// Storage for module configurations, keyed by module id.
pub trait ConfigRepository: Send + Sync + 'static {
    /// Returns the configuration stored under `id`.
    fn get(&self, id: &str) -> Result<ModuleConfig, RepositoryError>;

    /// Stores a new configuration; fails if the id is taken.
    fn add(&self, config: ModuleConfig) -> Result<(), RepositoryError>;

    /// Replaces an existing configuration; fails if the id is unknown.
    fn update(&self, config: ModuleConfig) -> Result<(), RepositoryError>;

    /// Deletes the configuration stored under `id`.
    fn remove(&self, id: &str) -> Result<(), RepositoryError>;

    /// Returns every stored configuration.
    fn get_all_modules_configurations(&self) -> Result<Vec<ModuleConfig>, RepositoryError>;
}

/// Map-backed repository, ordered by id.
#[derive(Debug, Default)]
pub struct InMemoryConfigRepository {
    configs: RwLock<BTreeMap<String, ModuleConfig>>,
}

impl InMemoryConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository holding `configs`; later duplicates replace earlier ones.
    pub fn with_configs(configs: impl IntoIterator<Item = ModuleConfig>) -> Self {
        let map = configs.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self {
            configs: RwLock::new(map),
        }
    }

    pub fn len(&self) -> usize {
        self.configs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.read().is_empty()
    }
}

impl ConfigRepository for InMemoryConfigRepository {
    fn get(&self, id: &str) -> Result<ModuleConfig, RepositoryError> {
        self.configs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound { id: id.to_string() })
    }

    fn add(&self, config: ModuleConfig) -> Result<(), RepositoryError> {
        let mut configs = self.configs.write();
        if configs.contains_key(&config.id) {
            return Err(RepositoryError::AlreadyExists { id: config.id });
        }
        configs.insert(config.id.clone(), config);
        Ok(())
    }

    fn update(&self, config: ModuleConfig) -> Result<(), RepositoryError> {
        let mut configs = self.configs.write();
        match configs.get_mut(&config.id) {
            Some(slot) => {
                *slot = config;
                Ok(())
            }
            None => Err(RepositoryError::NotFound { id: config.id }),
        }
    }

    fn remove(&self, id: &str) -> Result<(), RepositoryError> {
        self.configs
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound { id: id.to_string() })
    }

    fn get_all_modules_configurations(&self) -> Result<Vec<ModuleConfig>, RepositoryError> {
        Ok(self.configs.read().values().cloned().collect())
    }
}
