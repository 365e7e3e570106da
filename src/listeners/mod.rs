//! # Event listeners for the hubvisor runtime.
//!
//! This module provides the [`EventListener`] trait and built-in implementations
//! for handling events delivered by the [`EventBus`](crate::EventBus).
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   Module ── EventHandler::publish(Event) ──► EventBus ──► (producer, topic) listeners
//!                                                 │              │
//!                                                 │              ├──► dependency waiters
//!                                                 │              └──► user listeners
//!                                                 │
//!                                                 └──► topic-wide listeners
//!                                                        ├──► StateTracker (registry)
//!                                                        └──► LogWriter (feature "logging")
//! ```
//!
//! ## Listener types
//! - **Passive listeners** observe and react to events (logging, audit, UI push)
//! - **Stateful listeners** maintain internal state based on events (StateTracker)

mod listener;
#[cfg(any(feature = "logging", test))]
mod log;

pub use listener::{EventListener, ListenerFn, ListenerRef};
pub(crate) use listener::same_listener;
#[cfg(any(feature = "logging", test))]
pub use log::LogWriter;
