//! Module lifecycle: states, configuration, behavior bodies and the state machine.
//!
//! ## Contents
//! - [`ModuleState`], [`Phase`] lifecycle states and body phases
//! - [`ModuleConfig`], [`ModuleDependency`] serde configuration records
//! - [`ModuleBehavior`], [`ModuleContext`] what an implementation supplies and receives
//! - [`Module`] the supervised state machine, with dependency resolution
//!   through a [`ModuleLookup`]

mod behavior;
mod config;
mod dependency;
mod lifecycle;
mod state;

pub use behavior::{BehaviorRef, ModuleBehavior, ModuleContext};
pub use config::{DependencyMode, DependencyPhase, ModuleConfig, ModuleDependency};
pub use dependency::ModuleLookup;
pub use lifecycle::{Module, ModuleSnapshot};
pub use state::{ModuleState, Phase};
