//! # Module registry: owner and orchestrator of every loaded module.
//!
//! The registry loads modules from configurations (delegating persistence to a
//! [`ConfigRepository`]), resolves module ids for dependency waits, and provides
//! the operations that span many modules.
//!
//! ## Architecture
//! ```text
//! ConfigRepository ──► load_module(cfg) ──► ModuleFactories[cfg.module_class](cfg)
//!                            │
//!                            ▼
//!                    Module::attached(.., Weak<registry>)
//!                            │ insert into map, publish Loaded, bump load counter
//!                            ▼
//!                    enabled? request_init(non-blocking) + request_start(queued)
//!
//! EventBus (topic "state") ──► StateTracker ──► module_states(), shutdown "stuck" report
//! load counter (watch)     ──► wait_for_all_modules_loaded()
//! ```
//!
//! ## Rules
//! - Loading is idempotent per id: a second load returns the existing module.
//! - A module that fails to initialize stays loaded, visible in `FAILED`.
//! - Repository calls are synchronous; their errors surface as [`RegistryError::Repository`].
//! - Modules hold the registry as `Weak`: a dropped registry resolves every lookup to "not found".

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{error, info, warn};

use crate::config::RuntimeConfig;
use crate::core::builder::RegistryBuilder;
use crate::core::factory::ModuleFactories;
use crate::core::tracker::StateTracker;
use crate::error::{RegistryError, RepositoryError};
use crate::events::{EventBus, EventKind, STATE_TOPIC};
use crate::listeners::ListenerRef;
use crate::module::{Module, ModuleConfig, ModuleLookup, ModuleState};
use crate::repository::ConfigRepository;

/// Authoritative set of loaded modules.
pub struct ModuleRegistry {
    cfg: RuntimeConfig,
    bus: EventBus,
    factories: ModuleFactories,
    repository: Arc<dyn ConfigRepository>,
    modules: RwLock<HashMap<String, Arc<Module>>>,
    tracker: Arc<StateTracker>,
    tracker_listener: ListenerRef,
    loads: watch::Sender<u64>,
    me: Weak<ModuleRegistry>,
}

impl ModuleRegistry {
    /// Returns a builder for configuring the registry.
    pub fn builder(cfg: RuntimeConfig) -> RegistryBuilder {
        RegistryBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: RuntimeConfig,
        bus: EventBus,
        factories: ModuleFactories,
        repository: Arc<dyn ConfigRepository>,
    ) -> Arc<Self> {
        let tracker = Arc::new(StateTracker::new());
        let tracker_listener: ListenerRef = tracker.clone();
        bus.register_topic_listener(STATE_TOPIC, Arc::clone(&tracker_listener));
        let (loads, _) = watch::channel(0);

        Arc::new_cyclic(|me| Self {
            cfg,
            bus,
            factories,
            repository,
            modules: RwLock::new(HashMap::new()),
            tracker,
            tracker_listener,
            loads,
            me: me.clone(),
        })
    }

    /// Bus shared by the registry and its modules.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Repository the registry persists to.
    pub fn repository(&self) -> &Arc<dyn ConfigRepository> {
        &self.repository
    }

    /// Tracker of the last published state of every module on the bus.
    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    /// Loads a module from `config`, or returns the already loaded one.
    ///
    /// An empty id is replaced by a generated one. When `config.enabled` is set the
    /// module is initialized and started in the background.
    pub async fn load_module(&self, mut config: ModuleConfig) -> Result<Arc<Module>, RegistryError> {
        if config.id.is_empty() {
            config.id = uuid::Uuid::new_v4().to_string();
        }
        if let Some(existing) = self.get_module_by_id(&config.id) {
            return Ok(existing);
        }
        config.validate()?;
        let factory = self
            .factories
            .get(&config.module_class)
            .ok_or_else(|| RegistryError::UnknownModuleClass {
                class: config.module_class.clone(),
            })?;
        let behavior = factory(&config)?;

        let lookup: Weak<dyn ModuleLookup> = self.me.clone();
        let created = Module::attached(config.clone(), behavior, &self.bus, self.cfg.clone(), lookup);
        let module = {
            let mut modules = self.modules.write();
            match modules.get(&config.id) {
                Some(existing) => return Ok(Arc::clone(existing)),
                None => {
                    modules.insert(config.id.clone(), Arc::clone(&created));
                    created
                }
            }
        };

        module.announce(EventKind::Loaded);
        self.loads.send_modify(|n| *n += 1);
        info!(module = %config.id, class = %config.module_class, enabled = config.enabled, "module loaded");

        if config.enabled {
            self.init_and_start(&module).await;
        }
        Ok(module)
    }

    /// Loads every configuration in the repository.
    ///
    /// Individual failures are logged and skipped; the loaded modules are returned.
    pub async fn load_all_modules(&self) -> Result<Vec<Arc<Module>>, RegistryError> {
        let configs = self.repository.get_all_modules_configurations()?;
        let mut loaded = Vec::with_capacity(configs.len());
        for config in configs {
            let id = config.id.clone();
            match self.load_module(config).await {
                Ok(m) => loaded.push(m),
                Err(e) => warn!(module = %id, error = %e, label = e.as_label(), "module load failed"),
            }
        }
        Ok(loaded)
    }

    /// Returns the loaded module with this id.
    pub fn get_module_by_id(&self, id: &str) -> Option<Arc<Module>> {
        self.modules.read().get(id).cloned()
    }

    /// Returns every loaded module, sorted by id.
    pub fn get_loaded_modules(&self) -> Vec<Arc<Module>> {
        let mut modules: Vec<Arc<Module>> = self.modules.read().values().cloned().collect();
        modules.sort_unstable_by(|a, b| a.local_id().cmp(b.local_id()));
        modules
    }

    /// Returns whether a module with this id is loaded.
    pub fn is_module_loaded(&self, id: &str) -> bool {
        self.modules.read().contains_key(id)
    }

    /// Returns `(id, state)` of every loaded module as last published, sorted by id.
    pub fn module_states(&self) -> Vec<(String, ModuleState)> {
        let modules = self.modules.read();
        self.tracker
            .snapshot()
            .into_iter()
            .filter(|(id, _)| modules.contains_key(id))
            .collect()
    }

    /// Waits until every module known to the repository is loaded.
    ///
    /// `None` waits without bound. On expiry the ids still missing are reported
    /// as [`RegistryError::LoadTimeout`].
    pub async fn wait_for_all_modules_loaded(&self, timeout: Option<Duration>) -> Result<(), RegistryError> {
        let mut rx = self.loads.subscribe();
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            let missing = self.missing_modules()?;
            if missing.is_empty() {
                return Ok(());
            }
            let changed = match deadline {
                Some(at) => match time::timeout_at(at, rx.changed()).await {
                    Ok(res) => res.is_ok(),
                    Err(_) => false,
                },
                None => rx.changed().await.is_ok(),
            };
            if !changed {
                return Err(RegistryError::LoadTimeout { missing });
            }
        }
    }

    /// Enables a module: loads it from the repository if needed, marks it enabled,
    /// then requests init (non-blocking) and start (queued behind init).
    pub async fn enable_module(&self, id: &str) -> Result<Arc<Module>, RegistryError> {
        let module = match self.get_module_by_id(id) {
            Some(m) => m,
            None => {
                let config = self.repository.get(id)?;
                self.load_module(config.with_enabled(false)).await?
            }
        };
        module.set_enabled(true);
        self.persist_enabled(id, true)?;
        self.init_and_start(&module).await;
        info!(module = %id, "module enabled");
        Ok(module)
    }

    /// Disables a loaded module: marks it disabled and stops it.
    pub async fn disable_module(&self, id: &str) -> Result<(), RegistryError> {
        let module = self.loaded(id)?;
        module.set_enabled(false);
        self.persist_enabled(id, false)?;
        module.request_stop(true).await?;
        info!(module = %id, "module disabled");
        Ok(())
    }

    /// Applies a new configuration to a loaded module and persists it.
    ///
    /// A module that is not loaded only has its stored configuration replaced.
    pub async fn update_module_config(&self, config: ModuleConfig) -> Result<(), RegistryError> {
        if config.id.is_empty() {
            return Err(crate::error::ModuleError::config("configuration without id").into());
        }
        config.validate()?;
        if let Some(module) = self.get_module_by_id(&config.id) {
            module.update_config(config.clone()).await?;
        }
        self.upsert(config)?;
        Ok(())
    }

    /// Stops a module, runs its cleanup, removes it and publishes `Unloaded`.
    pub async fn unload_module(&self, id: &str) -> Result<(), RegistryError> {
        let module = self.loaded(id)?;
        if !stop_quiescent(&module, self.cfg.shutdown_grace).await {
            return Err(RegistryError::InvalidState {
                id: id.to_string(),
                state: module.current_state(),
            });
        }
        if let Err(e) = module.cleanup().await {
            warn!(module = %id, error = %e, "cleanup failed during unload");
        }
        self.modules.write().remove(id);
        module.announce(EventKind::Unloaded);
        self.loads.send_modify(|n| *n += 1);
        info!(module = %id, "module unloaded");
        Ok(())
    }

    /// Unloads a module (if loaded) and deletes its stored configuration.
    pub async fn destroy_module(&self, id: &str) -> Result<(), RegistryError> {
        match self.unload_module(id).await {
            Ok(()) | Err(RegistryError::ModuleNotFound { .. }) => {}
            Err(e) => return Err(e),
        }
        self.repository.remove(id)?;
        info!(module = %id, "module destroyed");
        Ok(())
    }

    /// Writes the current configuration of every loaded module to the repository.
    ///
    /// Unknown ids are added. The first repository error aborts and is returned;
    /// running modules are not affected.
    pub fn save_modules_configuration(&self) -> Result<(), RegistryError> {
        for module in self.get_loaded_modules() {
            if let Err(e) = self.upsert(module.config()) {
                error!(module = %module.local_id(), error = %e, label = e.as_label(), "saving configuration failed");
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Stops every loaded module concurrently within `shutdown_grace`.
    ///
    /// Modules still not stopped afterwards are reported as
    /// [`RegistryError::GraceExceeded`].
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        let modules = self.get_loaded_modules();
        let grace = self.cfg.shutdown_grace;
        info!(modules = modules.len(), ?grace, "shutdown requested");

        futures::future::join_all(modules.iter().map(|m| stop_quiescent(m, grace))).await;

        let stuck: Vec<String> = self
            .tracker
            .not_stopped()
            .into_iter()
            .filter(|id| self.is_module_loaded(id))
            .collect();
        if stuck.is_empty() {
            info!("all modules stopped");
            Ok(())
        } else {
            warn!(?stuck, "shutdown grace exceeded");
            Err(RegistryError::GraceExceeded { grace, stuck })
        }
    }

    fn loaded(&self, id: &str) -> Result<Arc<Module>, RegistryError> {
        self.get_module_by_id(id)
            .ok_or_else(|| RegistryError::ModuleNotFound { id: id.to_string() })
    }

    /// Repository ids (non-empty) that are not loaded, sorted.
    fn missing_modules(&self) -> Result<Vec<String>, RegistryError> {
        let configs = self.repository.get_all_modules_configurations()?;
        let modules = self.modules.read();
        let mut missing: Vec<String> = configs
            .into_iter()
            .map(|c| c.id)
            .filter(|id| !id.is_empty() && !modules.contains_key(id))
            .collect();
        missing.sort_unstable();
        Ok(missing)
    }

    async fn init_and_start(&self, module: &Arc<Module>) {
        if let Err(e) = module.request_init(module.config(), false).await {
            warn!(module = %module.local_id(), error = %e, "init request failed");
            return;
        }
        if let Err(e) = module.request_start(false).await {
            warn!(module = %module.local_id(), error = %e, "start request failed");
        }
    }

    /// Updates the stored `enabled` flag; ids absent from the repository are skipped.
    fn persist_enabled(&self, id: &str, enabled: bool) -> Result<(), RegistryError> {
        match self.repository.get(id) {
            Ok(config) => self.repository.update(config.with_enabled(enabled))?,
            Err(RepositoryError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn upsert(&self, config: ModuleConfig) -> Result<(), RepositoryError> {
        match self.repository.update(config.clone()) {
            Err(RepositoryError::NotFound { .. }) => self.repository.add(config),
            other => other,
        }
    }
}

impl ModuleLookup for ModuleRegistry {
    fn find_module(&self, id: &str) -> Option<Arc<Module>> {
        self.get_module_by_id(id)
    }
}

impl Drop for ModuleRegistry {
    fn drop(&mut self) {
        self.bus
            .unregister_topic_listener(STATE_TOPIC, &self.tracker_listener);
    }
}

/// Drives a module to `STOPPED` (or leaves it `LOADED`) within `grace`.
///
/// The stop body runs on its own task, so a hanging body cannot hold the caller
/// past `grace`. Stops queued behind an in-flight transition are waited for.
async fn stop_quiescent(module: &Arc<Module>, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    loop {
        if let Err(e) = module.request_stop(false).await {
            warn!(module = %module.local_id(), error = %e, "stop request failed");
        }
        if matches!(module.current_state(), ModuleState::Stopped | ModuleState::Loaded) {
            return true;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        module
            .wait_for_state(ModuleState::Stopped, Some(remaining))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModuleError;
    use crate::events::Event;
    use crate::listeners::ListenerFn;
    use crate::module::{BehaviorRef, ModuleBehavior, ModuleContext, ModuleDependency};
    use crate::repository::InMemoryConfigRepository;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    #[derive(Default)]
    struct Scripted {
        stop_delay_ms: u64,
        inits: AtomicUsize,
        cleanups: AtomicUsize,
    }

    #[async_trait]
    impl ModuleBehavior for Scripted {
        async fn init(&self, _ctx: &ModuleContext<'_>, _config: &ModuleConfig) -> Result<(), ModuleError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn start(&self, _ctx: &ModuleContext<'_>) -> Result<(), ModuleError> {
            Ok(())
        }
        async fn stop(&self, _ctx: &ModuleContext<'_>) -> Result<(), ModuleError> {
            if self.stop_delay_ms > 0 {
                sleep(Duration::from_millis(self.stop_delay_ms)).await;
            }
            Ok(())
        }
        async fn cleanup(&self, _ctx: &ModuleContext<'_>) -> Result<(), ModuleError> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Repository whose writes always fail.
    struct ReadOnlyRepository;

    impl ConfigRepository for ReadOnlyRepository {
        fn get(&self, id: &str) -> Result<ModuleConfig, RepositoryError> {
            Err(RepositoryError::NotFound { id: id.to_string() })
        }
        fn add(&self, _config: ModuleConfig) -> Result<(), RepositoryError> {
            Err(RepositoryError::Storage { message: "read-only".into() })
        }
        fn update(&self, _config: ModuleConfig) -> Result<(), RepositoryError> {
            Err(RepositoryError::Storage { message: "read-only".into() })
        }
        fn remove(&self, _id: &str) -> Result<(), RepositoryError> {
            Err(RepositoryError::Storage { message: "read-only".into() })
        }
        fn get_all_modules_configurations(&self) -> Result<Vec<ModuleConfig>, RepositoryError> {
            Ok(Vec::new())
        }
    }

    fn registry(scripted: Arc<Scripted>, repository: Arc<dyn ConfigRepository>) -> Arc<ModuleRegistry> {
        ModuleRegistry::builder(RuntimeConfig {
            shutdown_grace: Duration::from_millis(200),
            ..RuntimeConfig::default()
        })
        .with_factory("scripted", move |_| Ok(Arc::clone(&scripted) as BehaviorRef))
        .with_repository(repository)
        .build()
    }

    fn scripted_registry() -> (Arc<Scripted>, Arc<InMemoryConfigRepository>, Arc<ModuleRegistry>) {
        let scripted = Arc::new(Scripted::default());
        let repo = Arc::new(InMemoryConfigRepository::new());
        let reg = registry(Arc::clone(&scripted), repo.clone());
        (scripted, repo, reg)
    }

    #[tokio::test]
    async fn test_load_is_idempotent_and_announced() {
        let (_, _, reg) = scripted_registry();
        let loaded = Arc::new(AtomicUsize::new(0));
        let l = Arc::clone(&loaded);
        reg.bus().register_topic_listener(
            STATE_TOPIC,
            ListenerFn::arc("loaded", move |ev: &Event| {
                if ev.kind == EventKind::Loaded {
                    l.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );

        let a = reg.load_module(ModuleConfig::new("a", "scripted")).await.unwrap();
        let again = reg.load_module(ModuleConfig::new("a", "scripted")).await.unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(loaded.load(Ordering::SeqCst), 1);
        assert_eq!(a.current_state(), ModuleState::Loaded);
        assert_eq!(reg.module_states(), vec![("a".to_string(), ModuleState::Loaded)]);
    }

    #[tokio::test]
    async fn test_unknown_class_is_rejected() {
        let (_, _, reg) = scripted_registry();
        let err = reg
            .load_module(ModuleConfig::new("x", "lidar"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownModuleClass { ref class } if class == "lidar"));
        assert!(!reg.is_module_loaded("x"));
    }

    #[tokio::test]
    async fn test_enabled_module_starts_on_load() {
        let (_, _, reg) = scripted_registry();
        let m = reg
            .load_module(ModuleConfig::new("a", "scripted").with_enabled(true))
            .await
            .unwrap();
        assert!(m.wait_for_state(ModuleState::Started, Some(Duration::from_secs(1))).await);
        assert_eq!(reg.get_loaded_modules().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_id_gets_generated() {
        let (_, _, reg) = scripted_registry();
        let m = reg.load_module(ModuleConfig::new("", "scripted")).await.unwrap();
        assert!(!m.local_id().is_empty());
        assert!(reg.is_module_loaded(m.local_id()));
    }

    #[tokio::test]
    async fn test_dependent_loaded_before_dependency() {
        let (_, _, reg) = scripted_registry();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = Arc::clone(&order);
        reg.bus().register_topic_listener(
            STATE_TOPIC,
            ListenerFn::arc("order", move |ev: &Event| {
                if let Some(s) = ev.new_state() {
                    o.lock().push((ev.producer.to_string(), s));
                }
            }),
        );

        let a = reg
            .load_module(
                ModuleConfig::new("a", "scripted")
                    .with_enabled(true)
                    .with_dependency(ModuleDependency::new("d", ModuleState::Started)),
            )
            .await
            .unwrap();
        assert_eq!(a.current_state(), ModuleState::Initializing);

        sleep(Duration::from_millis(20)).await;
        assert_eq!(a.current_state(), ModuleState::Initializing);
        reg.load_module(ModuleConfig::new("d", "scripted").with_enabled(true))
            .await
            .unwrap();

        assert!(a.wait_for_state(ModuleState::Started, Some(Duration::from_secs(1))).await);
        let order = order.lock();
        let pos = |id: &str, s: ModuleState| order.iter().position(|(p, st)| p == id && *st == s).unwrap();
        assert!(pos("d", ModuleState::Started) < pos("a", ModuleState::Initialized));
    }

    #[tokio::test]
    async fn test_wait_for_all_modules_loaded() {
        let scripted = Arc::new(Scripted::default());
        let repo = Arc::new(InMemoryConfigRepository::with_configs([
            ModuleConfig::new("a", "scripted"),
            ModuleConfig::new("b", "scripted"),
        ]));
        let reg = registry(scripted, repo.clone());

        reg.load_module(repo.get("a").unwrap()).await.unwrap();
        let r = Arc::clone(&reg);
        let b = repo.get("b").unwrap();
        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            r.load_module(b).await.unwrap();
        });
        reg.wait_for_all_modules_loaded(Some(Duration::from_secs(1)))
            .await
            .unwrap();

        repo.add(ModuleConfig::new("c", "scripted")).unwrap();
        let err = reg
            .wait_for_all_modules_loaded(Some(Duration::from_millis(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::LoadTimeout { ref missing } if missing == &["c".to_string()]));
    }

    #[tokio::test]
    async fn test_load_all_skips_failures() {
        let scripted = Arc::new(Scripted::default());
        let repo = Arc::new(InMemoryConfigRepository::with_configs([
            ModuleConfig::new("a", "scripted").with_enabled(true),
            ModuleConfig::new("b", "unknown"),
        ]));
        let reg = registry(scripted, repo);

        let loaded = reg.load_all_modules().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(reg.is_module_loaded("a"));
        assert!(!reg.is_module_loaded("b"));
    }

    #[tokio::test]
    async fn test_enable_then_disable_persists_flag() {
        let (_, repo, reg) = scripted_registry();
        repo.add(ModuleConfig::new("a", "scripted")).unwrap();

        let m = reg.enable_module("a").await.unwrap();
        assert!(m.wait_for_state(ModuleState::Started, Some(Duration::from_secs(1))).await);
        assert!(repo.get("a").unwrap().enabled);
        assert!(m.config().enabled);

        reg.disable_module("a").await.unwrap();
        assert_eq!(m.current_state(), ModuleState::Stopped);
        assert!(!repo.get("a").unwrap().enabled);

        assert!(matches!(
            reg.disable_module("zzz").await,
            Err(RegistryError::ModuleNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_save_adds_and_updates() {
        let (_, repo, reg) = scripted_registry();
        reg.load_module(ModuleConfig::new("a", "scripted")).await.unwrap();
        repo.add(ModuleConfig::new("b", "scripted").with_name("old")).unwrap();
        reg.load_module(ModuleConfig::new("b", "scripted").with_name("new"))
            .await
            .unwrap();

        reg.save_modules_configuration().unwrap();
        assert_eq!(repo.len(), 2);
        assert_eq!(repo.get("b").unwrap().name, "new");
    }

    #[tokio::test]
    async fn test_save_failure_propagates_without_touching_modules() {
        let scripted = Arc::new(Scripted::default());
        let reg = registry(scripted, Arc::new(ReadOnlyRepository));
        let m = reg
            .load_module(ModuleConfig::new("a", "scripted").with_enabled(true))
            .await
            .unwrap();
        assert!(m.wait_for_state(ModuleState::Started, Some(Duration::from_secs(1))).await);

        let err = reg.save_modules_configuration().unwrap_err();
        assert_eq!(err.as_label(), "repository_storage");
        assert_eq!(m.current_state(), ModuleState::Started);
    }

    #[tokio::test]
    async fn test_update_module_config_restarts_and_persists() {
        let (scripted, repo, reg) = scripted_registry();
        let m = reg
            .load_module(ModuleConfig::new("a", "scripted").with_enabled(true))
            .await
            .unwrap();
        assert!(m.wait_for_state(ModuleState::Started, Some(Duration::from_secs(1))).await);

        let cfg = m.config().with_property("rate", 5u64);
        reg.update_module_config(cfg).await.unwrap();
        assert_eq!(m.current_state(), ModuleState::Started);
        assert_eq!(scripted.inits.load(Ordering::SeqCst), 2);
        assert_eq!(repo.get("a").unwrap().property_u64("rate"), Some(5));
    }

    #[tokio::test]
    async fn test_unload_and_destroy() {
        let (scripted, repo, reg) = scripted_registry();
        repo.add(ModuleConfig::new("a", "scripted")).unwrap();
        let m = reg.enable_module("a").await.unwrap();
        assert!(m.wait_for_state(ModuleState::Started, Some(Duration::from_secs(1))).await);

        reg.unload_module("a").await.unwrap();
        assert_eq!(m.current_state(), ModuleState::Stopped);
        assert!(!reg.is_module_loaded("a"));
        assert!(reg.get_module_by_id("a").is_none());
        assert_eq!(scripted.cleanups.load(Ordering::SeqCst), 1);
        assert!(reg.module_states().is_empty());
        assert!(repo.get("a").is_ok());

        reg.load_module(repo.get("a").unwrap()).await.unwrap();
        reg.destroy_module("a").await.unwrap();
        assert!(!reg.is_module_loaded("a"));
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let (_, _, reg) = scripted_registry();
        for id in ["a", "b", "c"] {
            reg.load_module(ModuleConfig::new(id, "scripted").with_enabled(true))
                .await
                .unwrap();
        }
        for m in reg.get_loaded_modules() {
            assert!(m.wait_for_state(ModuleState::Started, Some(Duration::from_secs(1))).await);
        }

        reg.shutdown().await.unwrap();
        assert!(reg
            .get_loaded_modules()
            .iter()
            .all(|m| m.current_state() == ModuleState::Stopped));
    }

    #[tokio::test]
    async fn test_shutdown_reports_stuck_modules() {
        let slow = Arc::new(Scripted {
            stop_delay_ms: 1_000,
            ..Scripted::default()
        });
        let reg = registry(slow, Arc::new(InMemoryConfigRepository::new()));
        let m = reg
            .load_module(ModuleConfig::new("slow", "scripted").with_enabled(true))
            .await
            .unwrap();
        assert!(m.wait_for_state(ModuleState::Started, Some(Duration::from_secs(1))).await);

        let err = reg.shutdown().await.unwrap_err();
        match err {
            RegistryError::GraceExceeded { stuck, .. } => assert_eq!(stuck, vec!["slow".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(m.current_state(), ModuleState::Stopping);
    }

    #[tokio::test]
    async fn test_dropped_registry_resolves_nothing() {
        let (_, _, reg) = scripted_registry();
        let a = reg
            .load_module(
                ModuleConfig::new("a", "scripted")
                    .with_dependency_mode(crate::module::DependencyMode::PollWait)
                    .with_dependency(ModuleDependency::new("d", ModuleState::Started)),
            )
            .await
            .unwrap();
        drop(reg);

        let err = a.request_init(a.config(), true).await.unwrap_err();
        assert_eq!(err, ModuleError::NoRegistry);
    }
}
