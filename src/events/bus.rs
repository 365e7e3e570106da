//! # Process-wide event bus.
//!
//! [`EventBus`] maps `(producer, topic)` channels to ordered listener lists and
//! delivers every published [`Event`] synchronously on the publisher's thread.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                               Listeners:
//!   Module A ── EventHandler(A, "state") ──┐
//!   Module B ── EventHandler(B, "state") ──┼──► EventBus ──► (A, "state") [l1, l2, ...]
//!   Module B ── EventHandler(B, "data")  ──┘        │   ──► (B, "state") [l3]
//!                                                   │   ──► (B, "data")  [l4]
//!                                                   └─────► topic "state" [tracker, log]
//! ```
//!
//! ## Rules
//! - **Synchronous**: `publish()` returns after every listener has run.
//! - **Ordered**: producer-channel listeners in registration order, then topic-wide listeners
//!   in registration order.
//! - **Isolated**: a panicking listener is logged; the remaining listeners still get the event.
//! - **Snapshot**: listeners are read under the lock, called outside it; a listener that
//!   unregisters before a publish starts never sees that event.
//! - **Keys, not references**: producers are plain ids. Listeners may be registered before
//!   the producer exists and survive its unloading.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use hubvisor::{Event, EventBus, EventKind, ListenerFn, DATA_TOPIC};
//!
//! let bus = EventBus::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//!
//! let counter = seen.clone();
//! bus.register_listener("gps-1", DATA_TOPIC, ListenerFn::arc("count", move |_: &Event| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! }));
//!
//! let handler = bus.register_producer("gps-1", DATA_TOPIC);
//! handler.publish(EventKind::Data { payload: serde_json::json!({ "lat": 1.5 }) });
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! ```

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{trace, warn};

use super::event::Event;
use super::handler::EventHandler;
use crate::listeners::{same_listener, ListenerRef};

/// Listener lists keyed by producer then topic, plus topic-wide lists.
#[derive(Default)]
struct Channels {
    producers: HashMap<Arc<str>, HashMap<Arc<str>, Vec<ListenerRef>>>,
    topics: HashMap<Arc<str>, Vec<ListenerRef>>,
}

/// Shared registry of event channels.
///
/// ### Properties
/// - **Cloneable**: cheap to clone; all clones share the same channels.
/// - **Isolated instances**: every [`EventBus::new`] is an independent bus, so tests
///   do not interfere with each other.
#[derive(Clone, Default)]
pub struct EventBus {
    channels: Arc<RwLock<Channels>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ch = self.channels.read();
        f.debug_struct("EventBus")
            .field("producers", &ch.producers.len())
            .field("topics", &ch.topics.len())
            .finish()
    }
}

impl EventBus {
    /// Creates a new, empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handler bound to `(producer, topic)`.
    ///
    /// Repeated calls with the same key return handlers over the same channel.
    pub fn register_producer(
        &self,
        producer: impl Into<Arc<str>>,
        topic: impl Into<Arc<str>>,
    ) -> EventHandler {
        EventHandler::new(self.clone(), producer.into(), topic.into())
    }

    /// Subscribes `listener` to `(producer, topic)`.
    ///
    /// The producer does not need to exist yet. Returns `false` if the same
    /// listener was already registered on this channel.
    pub fn register_listener(&self, producer: &str, topic: &str, listener: ListenerRef) -> bool {
        let mut ch = self.channels.write();
        let list = ch
            .producers
            .entry(Arc::from(producer))
            .or_default()
            .entry(Arc::from(topic))
            .or_default();
        push_unique(list, listener)
    }

    /// Removes `listener` from `(producer, topic)`.
    ///
    /// Returns `false` if it was not registered. Channels left without listeners are pruned.
    pub fn unregister_listener(&self, producer: &str, topic: &str, listener: &ListenerRef) -> bool {
        let mut ch = self.channels.write();
        let Some(topics) = ch.producers.get_mut(producer) else {
            return false;
        };
        let Some(list) = topics.get_mut(topic) else {
            return false;
        };
        let removed = remove_listener(list, listener);
        if list.is_empty() {
            topics.remove(topic);
            if topics.is_empty() {
                ch.producers.remove(producer);
            }
        }
        removed
    }

    /// Subscribes `listener` to `topic` for every producer.
    pub fn register_topic_listener(&self, topic: &str, listener: ListenerRef) -> bool {
        let mut ch = self.channels.write();
        let list = ch.topics.entry(Arc::from(topic)).or_default();
        push_unique(list, listener)
    }

    /// Removes a topic-wide listener.
    pub fn unregister_topic_listener(&self, topic: &str, listener: &ListenerRef) -> bool {
        let mut ch = self.channels.write();
        let Some(list) = ch.topics.get_mut(topic) else {
            return false;
        };
        let removed = remove_listener(list, listener);
        if list.is_empty() {
            ch.topics.remove(topic);
        }
        removed
    }

    /// Number of listeners registered on `(producer, topic)` (topic-wide ones excluded).
    pub fn listener_count(&self, producer: &str, topic: &str) -> usize {
        self.channels
            .read()
            .producers
            .get(producer)
            .and_then(|t| t.get(topic))
            .map_or(0, Vec::len)
    }

    /// Delivers `event` on the channel named by its own producer and topic.
    pub fn publish(&self, event: &Event) {
        self.deliver(&event.producer, &event.topic, event);
    }

    /// Delivers `event` to the listeners of `(producer, topic)` and of `topic`.
    pub(crate) fn deliver(&self, producer: &str, topic: &str, event: &Event) {
        let listeners = self.snapshot(producer, topic);
        trace!(producer, topic, seq = event.seq, listeners = listeners.len(), "deliver");

        for listener in &listeners {
            let res = catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            if let Err(panic_err) = res {
                warn!(
                    listener = listener.name(),
                    producer,
                    topic,
                    info = %panic_message(panic_err.as_ref()),
                    "listener panicked"
                );
            }
        }
    }

    /// Copies the current listener lists so that delivery runs without the lock.
    fn snapshot(&self, producer: &str, topic: &str) -> Vec<ListenerRef> {
        let ch = self.channels.read();
        let mut out = Vec::new();
        if let Some(list) = ch.producers.get(producer).and_then(|t| t.get(topic)) {
            out.extend(list.iter().cloned());
        }
        if let Some(list) = ch.topics.get(topic) {
            out.extend(list.iter().cloned());
        }
        out
    }
}

fn push_unique(list: &mut Vec<ListenerRef>, listener: ListenerRef) -> bool {
    if list.iter().any(|l| same_listener(l, &listener)) {
        return false;
    }
    list.push(listener);
    true
}

fn remove_listener(list: &mut Vec<ListenerRef>, listener: &ListenerRef) -> bool {
    let before = list.len();
    list.retain(|l| !same_listener(l, listener));
    list.len() != before
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(any: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
