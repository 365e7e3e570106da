//! # Event listener trait.
//!
//! Provides [`EventListener`] the extension point for reacting to bus events, and
//! [`ListenerFn`] a closure-backed implementation.
//!
//! ## Rules
//! - `on_event` runs **on the publisher's thread**, inside the publish call.
//! - Listeners must not block; hand long work to a task (`tokio::spawn`).
//! - A panicking listener is isolated: the bus logs it and keeps delivering to the others.
//! - Identity is the `Arc` allocation: the same `Arc` registered twice is delivered once.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use hubvisor::{Event, EventBus, EventListener, STATE_TOPIC};
//!
//! struct Audit;
//!
//! impl EventListener for Audit {
//!     fn on_event(&self, ev: &Event) {
//!         if let Some(state) = ev.new_state() {
//!             let _ = (ev.producer.clone(), state); // write an audit record, etc.
//!         }
//!     }
//!
//!     fn name(&self) -> &str { "audit" }
//! }
//!
//! let bus = EventBus::new();
//! bus.register_topic_listener(STATE_TOPIC, Arc::new(Audit));
//! ```

use std::borrow::Cow;
use std::sync::Arc;

use crate::events::Event;

/// Synchronous event callback.
pub trait EventListener: Send + Sync + 'static {
    /// Processes a single event.
    ///
    /// Called on the publisher's thread, in listener registration order.
    fn on_event(&self, event: &Event);

    /// Returns the listener name used in logs.
    ///
    /// The default uses `type_name::<Self>()`, which can be verbose - override it when possible.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Shared handle to a listener.
pub type ListenerRef = Arc<dyn EventListener>;

/// Function-backed listener.
pub struct ListenerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> ListenerFn<F>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Creates the listener and returns it as a shared handle.
    ///
    /// ## Example
    /// ```rust
    /// use hubvisor::{Event, ListenerFn, ListenerRef};
    ///
    /// let l: ListenerRef = ListenerFn::arc("printer", |ev: &Event| println!("{:?}", ev.kind));
    /// assert_eq!(l.name(), "printer");
    /// ```
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<F> EventListener for ListenerFn<F>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    fn on_event(&self, event: &Event) {
        (self.f)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Returns whether two handles point to the same listener allocation.
#[inline]
pub(crate) fn same_listener(a: &ListenerRef, b: &ListenerRef) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
