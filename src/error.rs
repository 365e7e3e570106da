//! Error types used by the hubvisor runtime, its modules and repositories.
//!
//! This module defines three error enums:
//!
//! - [`ModuleError`]: errors raised while driving one module through its lifecycle.
//! - [`RepositoryError`]: errors raised by a [`ConfigRepository`](crate::ConfigRepository).
//! - [`RegistryError`]: errors raised by the [`ModuleRegistry`](crate::ModuleRegistry) orchestrator.
//!
//! All of them provide `as_label` (stable snake_case label for logs/metrics).
//! [`ModuleError`] is `Clone`: it is recorded on the module and handed out to any
//! number of readers through [`Module::current_error`](crate::Module::current_error).

use std::time::Duration;
use thiserror::Error;

use crate::module::{ModuleState, Phase};

/// # Errors produced while driving a module's lifecycle.
///
/// Taxonomy:
/// - **Configuration**: [`ModuleError::Config`]; the module goes to `FAILED`.
/// - **Dependency**: [`ModuleError::DependencyNotFound`], [`ModuleError::DependencyTimeout`],
///   [`ModuleError::DependencyFailed`], [`ModuleError::NoRegistry`]; the module returns to the
///   state it had before the request so it can be retried.
/// - **Execution**: [`ModuleError::Execution`], [`ModuleError::Panicked`]; raised by a lifecycle
///   body. `FAILED` for init/start, `STOPPED` anyway for stop.
/// - **Busy**: an operation that needs a quiescent module arrived mid-transition.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    /// Invalid or missing configuration.
    #[error("invalid configuration: {message}")]
    Config {
        /// What is wrong with the configuration.
        message: String,
    },

    /// A named dependency is not loaded and did not appear within the wait bound.
    #[error("dependency '{module_id}' not found")]
    DependencyNotFound {
        /// Id of the missing module.
        module_id: String,
    },

    /// A dependency did not reach the required state within the wait bound.
    #[error("dependency '{module_id}' did not reach {required} within {timeout:?}")]
    DependencyTimeout {
        /// Id of the dependency.
        module_id: String,
        /// State the dependent was waiting for.
        required: ModuleState,
        /// Bound that elapsed.
        timeout: Duration,
    },

    /// A dependency moved to a state from which the required one is not reachable.
    #[error("dependency '{module_id}' went {observed} while waiting for {required}")]
    DependencyFailed {
        /// Id of the dependency.
        module_id: String,
        /// State the dependent was waiting for.
        required: ModuleState,
        /// State that ended the wait.
        observed: ModuleState,
    },

    /// Poll-wait dependency resolution needs a registry to look modules up.
    #[error("module is not attached to a registry")]
    NoRegistry,

    /// A lifecycle body returned an error.
    #[error("{phase} failed: {message}")]
    Execution {
        /// Lifecycle body that failed.
        phase: Phase,
        /// The underlying error message.
        message: String,
    },

    /// A lifecycle body panicked.
    #[error("{phase} panicked: {info}")]
    Panicked {
        /// Lifecycle body that panicked.
        phase: Phase,
        /// Panic payload, when it was a string.
        info: String,
    },

    /// The module is mid-transition and cannot accept the operation.
    #[error("module is busy ({state})")]
    Busy {
        /// State observed when the operation was refused.
        state: ModuleState,
    },
}

impl ModuleError {
    /// Shorthand for an [`ModuleError::Execution`] error.
    pub fn execution(phase: Phase, message: impl Into<String>) -> Self {
        ModuleError::Execution {
            phase,
            message: message.into(),
        }
    }

    /// Shorthand for a [`ModuleError::Config`] error.
    pub fn config(message: impl Into<String>) -> Self {
        ModuleError::Config {
            message: message.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use hubvisor::{ModuleError, Phase};
    ///
    /// let err = ModuleError::execution(Phase::Init, "device not found");
    /// assert_eq!(err.as_label(), "module_execution");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ModuleError::Config { .. } => "module_config",
            ModuleError::DependencyNotFound { .. } => "module_dependency_not_found",
            ModuleError::DependencyTimeout { .. } => "module_dependency_timeout",
            ModuleError::DependencyFailed { .. } => "module_dependency_failed",
            ModuleError::NoRegistry => "module_no_registry",
            ModuleError::Execution { .. } => "module_execution",
            ModuleError::Panicked { .. } => "module_panicked",
            ModuleError::Busy { .. } => "module_busy",
        }
    }

    /// Indicates whether the error came from dependency resolution.
    ///
    /// Dependency errors leave the module in its pre-request state, so the
    /// same request can simply be issued again.
    pub fn is_dependency(&self) -> bool {
        matches!(
            self,
            ModuleError::DependencyNotFound { .. }
                | ModuleError::DependencyTimeout { .. }
                | ModuleError::DependencyFailed { .. }
                | ModuleError::NoRegistry
        )
    }
}

/// # Errors produced by a configuration repository.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// No configuration is stored under this id.
    #[error("no configuration for module '{id}'")]
    NotFound {
        /// Requested module id.
        id: String,
    },

    /// A configuration with this id is already stored.
    #[error("configuration for module '{id}' already exists")]
    AlreadyExists {
        /// Conflicting module id.
        id: String,
    },

    /// The backing store failed.
    #[error("repository storage error: {message}")]
    Storage {
        /// The underlying error message.
        message: String,
    },
}

impl RepositoryError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RepositoryError::NotFound { .. } => "repository_not_found",
            RepositoryError::AlreadyExists { .. } => "repository_already_exists",
            RepositoryError::Storage { .. } => "repository_storage",
        }
    }
}

/// # Errors produced by the module registry.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No factory is registered for the configured module class.
    #[error("no factory registered for module class '{class}'")]
    UnknownModuleClass {
        /// Class tag taken from the configuration.
        class: String,
    },

    /// The module is not loaded.
    #[error("module '{id}' is not loaded")]
    ModuleNotFound {
        /// Requested module id.
        id: String,
    },

    /// The module is in a state that does not permit the operation.
    #[error("module '{id}' is {state}")]
    InvalidState {
        /// Module id.
        id: String,
        /// Observed state.
        state: ModuleState,
    },

    /// Configuration repository failure.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Module lifecycle failure.
    #[error(transparent)]
    Module(#[from] ModuleError),

    /// Not every configured module was loaded before the barrier timed out.
    #[error("modules not loaded in time: {missing:?}")]
    LoadTimeout {
        /// Ids known to the repository but still not loaded.
        missing: Vec<String>,
    },

    /// Shutdown grace period was exceeded; some modules did not stop in time.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Ids of modules that had not stopped.
        stuck: Vec<String>,
    },
}

impl RegistryError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use hubvisor::RegistryError;
    /// use std::time::Duration;
    ///
    /// let err = RegistryError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "registry_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RegistryError::UnknownModuleClass { .. } => "registry_unknown_class",
            RegistryError::ModuleNotFound { .. } => "registry_module_not_found",
            RegistryError::InvalidState { .. } => "registry_invalid_state",
            RegistryError::Repository(e) => e.as_label(),
            RegistryError::Module(e) => e.as_label(),
            RegistryError::LoadTimeout { .. } => "registry_load_timeout",
            RegistryError::GraceExceeded { .. } => "registry_grace_exceeded",
        }
    }
}
