//! Runtime core: orchestration of many modules.
//!
//! The only entry point from this module is [`ModuleRegistry`], built through
//! [`RegistryBuilder`].
//!
//! Internal modules:
//! - [`registry`]: owns loaded modules, load barrier, enable/disable, unload, shutdown;
//! - [`tracker`]: sequence-ordered view of every module's published state;
//! - [`factory`]: class tag → behavior factory map;
//! - [`builder`]: assembles the registry with its bus, repository and factories.

mod builder;
mod factory;
mod registry;
mod tracker;

pub use builder::RegistryBuilder;
pub use factory::{ModuleFactories, ModuleFactory};
pub use registry::ModuleRegistry;
pub use tracker::StateTracker;
