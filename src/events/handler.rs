//! # Per-producer event handler.
//!
//! An [`EventHandler`] is bound to one `(producer, topic)` channel of an
//! [`EventBus`]. Modules publish through it; external parties subscribe through it.
//! Handlers hold only the channel key, so every handler obtained for the same key
//! sees the same listener set, including listeners registered on the bus before the
//! handler existed.

use std::sync::Arc;

use super::bus::EventBus;
use super::event::{Event, EventKind};
use crate::listeners::ListenerRef;

/// Fan-out helper bound to one `(producer, topic)` pair.
#[derive(Clone, Debug)]
pub struct EventHandler {
    bus: EventBus,
    producer: Arc<str>,
    topic: Arc<str>,
}

impl EventHandler {
    pub(crate) fn new(bus: EventBus, producer: Arc<str>, topic: Arc<str>) -> Self {
        Self { bus, producer, topic }
    }

    /// Producer id this handler publishes as.
    pub fn producer(&self) -> &str {
        &self.producer
    }

    /// Topic this handler publishes on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Bus the handler publishes to.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Builds an event with this handler's producer and topic and delivers it.
    ///
    /// Returns the delivered event.
    pub fn publish(&self, kind: EventKind) -> Event {
        let ev = Event::new(self.producer.clone(), self.topic.clone(), kind);
        self.publish_event(&ev);
        ev
    }

    /// Delivers `event` synchronously to every listener of this channel.
    ///
    /// The channel is the handler's own; the event's `producer`/`topic` fields are
    /// carried as-is.
    pub fn publish_event(&self, event: &Event) {
        self.bus.deliver(&self.producer, &self.topic, event);
    }

    /// Subscribes `listener` to this channel. Idempotent per listener.
    pub fn register_listener(&self, listener: ListenerRef) -> bool {
        self.bus.register_listener(&self.producer, &self.topic, listener)
    }

    /// Unsubscribes `listener` from this channel.
    pub fn unregister_listener(&self, listener: &ListenerRef) -> bool {
        self.bus.unregister_listener(&self.producer, &self.topic, listener)
    }

    /// Number of listeners on this channel (topic-wide ones excluded).
    pub fn listener_count(&self) -> usize {
        self.bus.listener_count(&self.producer, &self.topic)
    }
}
