//! # hubvisor
//!
//! **Hubvisor** is the lifecycle runtime of a pluggable device/data-acquisition hub.
//!
//! Independently loadable modules (sensors, storages, processors, services) are
//! initialized, started, stopped and reconfigured at arbitrary times, often with
//! cross-module dependencies, without blocking the rest of the system.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │ ModuleConfig │   │ ModuleConfig │   │ ModuleConfig │
//!     │  (gps-1)     │   │  (serial)    │   │  (storage)   │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  ModuleRegistry (orchestrator)                                    │
//! │  - ModuleFactories (class tag → behavior)                         │
//! │  - ConfigRepository (persistence, external)                       │
//! │  - StateTracker (last published state, sequence-ordered)          │
//! │  - load barrier, enable/disable, unload, shutdown                 │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │    Module    │   │    Module    │   │    Module    │
//!     │ state machine│   │ state machine│   │ state machine│
//!     └┬─────────────┘   └┬─────────────┘   └┬─────────────┘
//!      │ StateChanged     │ StateChanged     │ Data
//!      ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │           EventBus: (producer, topic) → listeners                 │
//! │        synchronous delivery on the publisher's thread             │
//! └──────┬──────────────────────────┬──────────────────────┬──────────┘
//!        ▼                          ▼                      ▼
//!  dependency waiters         StateTracker           user listeners
//!  (other modules)            (topic "state")        (LogWriter, ...)
//! ```
//!
//! ### Lifecycle
//! ```text
//! LOADED ─► INITIALIZING ─► INITIALIZED ─► STARTING ─► STARTED ─► STOPPING ─► STOPPED
//!                │                             │                                 │
//!                └──────────► FAILED ◄─────────┘                                 │
//!                               │                                                │
//!                               └────── request_init (retry / re-init) ◄─────────┘
//!
//! request_init(cfg):
//!   ├─► validate config (invalid ─► FAILED)
//!   ├─► LOADED/STOPPED/FAILED ─► INITIALIZING (else: no-op)
//!   ├─► wait for init dependencies (event-driven or poll-wait)
//!   │       └─ timeout/not found ─► back to previous state, error recorded
//!   └─► behavior.init() ─► INITIALIZED | FAILED
//! ```
//!
//! ## Features
//! | Area              | Description                                                      | Key types / traits                          |
//! |-------------------|------------------------------------------------------------------|---------------------------------------------|
//! | **Modules**       | Supervised lifecycle around user behaviors.                      | [`Module`], [`ModuleBehavior`]              |
//! | **Event bus**     | Per-producer channels with synchronous fan-out.                  | [`EventBus`], [`EventHandler`], [`Event`]   |
//! | **Listeners**     | React to bus events.                                             | [`EventListener`], [`ListenerFn`]           |
//! | **Registry**      | Load, enable, disable, unload and shut down many modules.        | [`ModuleRegistry`], [`RegistryBuilder`]     |
//! | **Persistence**   | Pluggable configuration storage.                                 | [`ConfigRepository`]                        |
//! | **Errors**        | Typed errors for modules, registry and repositories.             | [`ModuleError`], [`RegistryError`]          |
//! | **Configuration** | Centralize runtime settings.                                     | [`RuntimeConfig`]                           |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] listener _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use hubvisor::{
//!     BehaviorRef, InMemoryConfigRepository, ModuleBehavior, ModuleConfig, ModuleContext,
//!     ModuleError, ModuleRegistry, ModuleState, RuntimeConfig,
//! };
//!
//! struct Clock;
//!
//! #[async_trait]
//! impl ModuleBehavior for Clock {
//!     async fn init(&self, _ctx: &ModuleContext<'_>, _cfg: &ModuleConfig) -> Result<(), ModuleError> {
//!         Ok(())
//!     }
//!     async fn start(&self, ctx: &ModuleContext<'_>) -> Result<(), ModuleError> {
//!         ctx.set_status_message("ticking");
//!         Ok(())
//!     }
//!     async fn stop(&self, _ctx: &ModuleContext<'_>) -> Result<(), ModuleError> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let repo = Arc::new(InMemoryConfigRepository::with_configs([
//!         ModuleConfig::new("clock", "clock").with_enabled(true),
//!     ]));
//!
//!     let registry = ModuleRegistry::builder(RuntimeConfig::default())
//!         .with_factory("clock", |_| Ok(Arc::new(Clock) as BehaviorRef))
//!         .with_repository(repo)
//!         .build();
//!
//!     registry.load_all_modules().await?;
//!     registry.wait_for_all_modules_loaded(None).await?;
//!
//!     let clock = registry.get_module_by_id("clock").expect("loaded");
//!     assert!(clock.wait_for_state(ModuleState::Started, None).await);
//!
//!     registry.shutdown().await?;
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod listeners;
mod module;
mod repository;

// ---- Public re-exports ----

pub use config::RuntimeConfig;
pub use crate::core::{ModuleFactories, ModuleFactory, ModuleRegistry, RegistryBuilder, StateTracker};
pub use error::{ModuleError, RegistryError, RepositoryError};
pub use events::{Event, EventBus, EventHandler, EventKind, DATA_TOPIC, STATE_TOPIC};
pub use listeners::{EventListener, ListenerFn, ListenerRef};
pub use module::{
    BehaviorRef, DependencyMode, DependencyPhase, Module, ModuleBehavior, ModuleConfig,
    ModuleContext, ModuleDependency, ModuleLookup, ModuleSnapshot, ModuleState, Phase,
};
pub use repository::{ConfigRepository, InMemoryConfigRepository};

// Optional: expose a simple built-in logger listener (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use listeners::LogWriter;
