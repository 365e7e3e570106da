//! # Module behavior: the lifecycle bodies a module implementation supplies.
//!
//! The runtime wraps a [`ModuleBehavior`] with the supervised state machine of
//! [`Module`]. Bodies receive a [`ModuleContext`] to publish domain events and
//! status messages under the module's own producer id.
//!
//! ## Rules
//! - Bodies are never run concurrently for one module; at most one transition is in flight.
//! - Errors and panics are caught: `init`/`start` failures move the module to `FAILED`,
//!   `stop` failures are recorded but the module still reaches `STOPPED`.
//! - `stop` may be called although `init`/`start` never completed and must tolerate it.
//!
//! # Example
//! ```
//! use async_trait::async_trait;
//! use hubvisor::{ModuleBehavior, ModuleConfig, ModuleContext, ModuleError};
//!
//! struct Thermometer;
//!
//! #[async_trait]
//! impl ModuleBehavior for Thermometer {
//!     async fn init(&self, ctx: &ModuleContext<'_>, config: &ModuleConfig) -> Result<(), ModuleError> {
//!         if config.property_str("device").is_none() {
//!             return Err(ModuleError::config("missing 'device' property"));
//!         }
//!         ctx.set_status_message("device opened");
//!         Ok(())
//!     }
//!
//!     async fn start(&self, ctx: &ModuleContext<'_>) -> Result<(), ModuleError> {
//!         ctx.publish_data("data", serde_json::json!({ "celsius": 21.5 }));
//!         Ok(())
//!     }
//!
//!     async fn stop(&self, _ctx: &ModuleContext<'_>) -> Result<(), ModuleError> {
//!         Ok(())
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ModuleError;
use crate::events::{Event, EventHandler, EventKind};
use crate::module::{Module, ModuleConfig, ModuleState};

/// Lifecycle bodies of a module implementation.
#[async_trait]
pub trait ModuleBehavior: Send + Sync + 'static {
    /// Prepares the module with `config`. Runs in `INITIALIZING`.
    async fn init(&self, ctx: &ModuleContext<'_>, config: &ModuleConfig) -> Result<(), ModuleError>;

    /// Starts producing. Runs in `STARTING`.
    async fn start(&self, ctx: &ModuleContext<'_>) -> Result<(), ModuleError>;

    /// Stops producing. Runs in `STOPPING`; best-effort.
    async fn stop(&self, ctx: &ModuleContext<'_>) -> Result<(), ModuleError>;

    /// Releases everything before the module is unloaded.
    async fn cleanup(&self, _ctx: &ModuleContext<'_>) -> Result<(), ModuleError> {
        Ok(())
    }
}

/// Shared handle to a behavior.
pub type BehaviorRef = Arc<dyn ModuleBehavior>;

/// View of the module handed to its lifecycle bodies.
pub struct ModuleContext<'a> {
    module: &'a Module,
}

impl<'a> ModuleContext<'a> {
    pub(crate) fn new(module: &'a Module) -> Self {
        Self { module }
    }

    /// The module's local id (its producer id on the bus).
    pub fn local_id(&self) -> &str {
        self.module.local_id()
    }

    /// Current state; `INITIALIZING`, `STARTING` or `STOPPING` while a body runs.
    pub fn state(&self) -> ModuleState {
        self.module.current_state()
    }

    /// Handler of the module's lifecycle topic.
    pub fn event_handler(&self) -> &EventHandler {
        self.module.event_handler()
    }

    /// Handler for an additional topic of this module.
    pub fn handler_for(&self, topic: &str) -> EventHandler {
        self.module
            .event_handler()
            .bus()
            .register_producer(self.module.local_id(), topic)
    }

    /// Publishes a data payload on `topic` as this module.
    pub fn publish_data(&self, topic: &str, payload: serde_json::Value) -> Event {
        self.handler_for(topic).publish(EventKind::Data { payload })
    }

    /// Updates the status message and publishes `StatusChanged`.
    pub fn set_status_message(&self, message: impl Into<Arc<str>>) {
        self.module.set_status_message(message);
    }
}
