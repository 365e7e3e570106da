//! Bus events: types, the process-wide bus and per-producer handlers.
//!
//! This module groups the event **data model**, the **bus** that routes events from
//! producers to listeners, and the **handler** modules publish through.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] payload sum type and metadata
//! - [`EventBus`] `(producer, topic)` → listeners registry with synchronous delivery
//! - [`EventHandler`] publish/subscribe helper bound to one channel
//!
//! ## Quick reference
//! - **Publishers**: `Module` (state changes, status, config), `ModuleRegistry`
//!   (loaded/unloaded), module bodies via `ModuleContext` (data on any topic).
//! - **Consumers**: dependency waiters of other modules, the registry's `StateTracker`,
//!   user listeners.

mod bus;
mod event;
mod handler;

pub use bus::EventBus;
pub(crate) use bus::panic_message;
pub use event::{Event, EventKind, DATA_TOPIC, STATE_TOPIC};
pub use handler::EventHandler;
