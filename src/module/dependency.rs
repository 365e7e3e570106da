//! # Dependency resolution before `init` / `start`.
//!
//! Two strategies, chosen per module by [`DependencyMode`]:
//!
//! ```text
//! EventDriven:
//!   register listener on (dep_id, "state") ──► check current state via lookup
//!        │                                          │ satisfied → signal
//!        ▼                                          ▼
//!   StateChanged{new ⊨ required} ─────────────► oneshot fired
//!   (spawned task awaits every oneshot under one deadline, then unregisters)
//!
//! PollWait:
//!   lookup(dep_id) ─ none ─► sleep(poll interval) ─► lookup again (until deadline)
//!        │ found
//!        ▼
//!   dep.wait_for_state(required, remaining) ─► FAILED/STOPPED observed → DependencyFailed
//! ```
//!
//! ### Rules
//! - Listeners are registered **before** current states are checked, so a dependency
//!   that transitions in between is never missed.
//! - Dependencies are keyed by id only; a module that does not exist yet is simply waited for.
//! - Dependency states are read settled: a state whose `StateChanged` event is still being
//!   delivered is not acted upon until the delivery completes.
//! - Both strategies need a registry to look dependencies up; a standalone module with
//!   dependencies fails with [`ModuleError::NoRegistry`].
//! - One deadline covers the whole set of dependencies of a phase.
//! - A queued stop cancels the wait through the transition's cancellation token.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ModuleError;
use crate::events::{Event, EventBus, STATE_TOPIC};
use crate::listeners::{ListenerFn, ListenerRef};
use crate::module::{DependencyMode, Module, ModuleDependency};

/// Resolves module ids to live modules. Implemented by the registry.
pub trait ModuleLookup: Send + Sync + 'static {
    /// Returns the loaded module with this id, if any.
    fn find_module(&self, id: &str) -> Option<Arc<Module>>;
}

/// Why a dependency wait ended without every dependency satisfied.
#[derive(Debug)]
pub(crate) enum WaitFailure {
    /// A stop was requested while waiting.
    Cancelled,
    /// Resolution failed; the transition is reverted with this error.
    Error(ModuleError),
}

type Signal = Arc<Mutex<Option<oneshot::Sender<()>>>>;

fn fire(signal: &Signal) {
    if let Some(tx) = signal.lock().take() {
        let _ = tx.send(());
    }
}

struct Watch {
    dep: ModuleDependency,
    listener: ListenerRef,
    rx: oneshot::Receiver<()>,
}

/// Listeners registered on the dependencies' state topics.
///
/// Unregisters them on drop, whatever the outcome of the wait.
pub(crate) struct EventWait {
    bus: EventBus,
    watches: Vec<Watch>,
}

impl EventWait {
    fn register(bus: &EventBus, lookup: &Arc<dyn ModuleLookup>, deps: Vec<ModuleDependency>) -> Self {
        let mut watches = Vec::with_capacity(deps.len());
        for dep in deps {
            let (tx, rx) = oneshot::channel();
            let signal: Signal = Arc::new(Mutex::new(Some(tx)));

            let required = dep.required_state;
            let on_state = Arc::clone(&signal);
            let listener: ListenerRef = ListenerFn::arc(
                format!("dependency:{}", dep.module_id),
                move |ev: &Event| {
                    if ev.new_state().is_some_and(|s| s.satisfies(required)) {
                        fire(&on_state);
                    }
                },
            );
            bus.register_listener(&dep.module_id, STATE_TOPIC, Arc::clone(&listener));

            let current = lookup.find_module(&dep.module_id).map(|m| m.settled_state());
            if current.is_some_and(|s| s.satisfies(required)) {
                fire(&signal);
            }

            watches.push(Watch { dep, listener, rx });
        }
        Self {
            bus: bus.clone(),
            watches,
        }
    }

    async fn wait(
        &mut self,
        lookup: Option<&Weak<dyn ModuleLookup>>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<(), WaitFailure> {
        let deadline = timeout.map(|d| Instant::now() + d);
        for watch in &mut self.watches {
            let expired = async {
                match deadline {
                    Some(at) => time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                res = &mut watch.rx => {
                    if res.is_err() {
                        return Err(WaitFailure::Error(ModuleError::DependencyNotFound {
                            module_id: watch.dep.module_id.clone(),
                        }));
                    }
                    settle(lookup, &watch.dep.module_id);
                    debug!(dependency = %watch.dep.module_id, required = %watch.dep.required_state, "dependency satisfied");
                }
                _ = expired => {
                    return Err(WaitFailure::Error(expired_error(lookup, &watch.dep, timeout.unwrap_or_default())));
                }
                _ = cancel.cancelled() => return Err(WaitFailure::Cancelled),
            }
        }
        Ok(())
    }
}

impl Drop for EventWait {
    fn drop(&mut self) {
        for w in &self.watches {
            self.bus
                .unregister_listener(&w.dep.module_id, STATE_TOPIC, &w.listener);
        }
    }
}

/// Blocks until the dependency's in-flight `StateChanged` delivery, if any, completes.
///
/// The signal fires from inside that delivery; later listeners may not have seen it yet.
fn settle(lookup: Option<&Weak<dyn ModuleLookup>>, id: &str) {
    if let Some(m) = lookup.and_then(Weak::upgrade).and_then(|l| l.find_module(id)) {
        m.settled_state();
    }
}

/// Error reported when the deadline passes: not-found if the dependency never
/// showed up, timeout otherwise.
fn expired_error(lookup: Option<&Weak<dyn ModuleLookup>>, dep: &ModuleDependency, timeout: Duration) -> ModuleError {
    let loaded = lookup
        .and_then(Weak::upgrade)
        .is_some_and(|l| l.find_module(&dep.module_id).is_some());
    if loaded {
        ModuleError::DependencyTimeout {
            module_id: dep.module_id.clone(),
            required: dep.required_state,
            timeout,
        }
    } else {
        ModuleError::DependencyNotFound {
            module_id: dep.module_id.clone(),
        }
    }
}

/// Dependency wait prepared for one transition.
pub(crate) enum DependencyWait {
    /// Nothing to wait for.
    Ready,
    /// Event-driven dependencies without a live registry.
    Unattached,
    Events(EventWait),
    Poll(Vec<ModuleDependency>),
}

impl DependencyWait {
    /// Prepares the wait; in event-driven mode the listeners are live on return.
    pub(crate) fn prepare(
        bus: &EventBus,
        lookup: Option<&Weak<dyn ModuleLookup>>,
        deps: Vec<ModuleDependency>,
        mode: DependencyMode,
    ) -> Self {
        if deps.is_empty() {
            return DependencyWait::Ready;
        }
        match mode {
            DependencyMode::EventDriven => match lookup.and_then(Weak::upgrade) {
                Some(registry) => DependencyWait::Events(EventWait::register(bus, &registry, deps)),
                None => DependencyWait::Unattached,
            },
            DependencyMode::PollWait => DependencyWait::Poll(deps),
        }
    }

    /// True when the transition must continue on a spawned task.
    pub(crate) fn is_event_driven(&self) -> bool {
        matches!(self, DependencyWait::Events(_))
    }

    /// Waits until every dependency is satisfied.
    pub(crate) async fn resolve(
        self,
        lookup: Option<&Weak<dyn ModuleLookup>>,
        timeout: Option<Duration>,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), WaitFailure> {
        match self {
            DependencyWait::Ready => Ok(()),
            DependencyWait::Unattached => Err(WaitFailure::Error(ModuleError::NoRegistry)),
            DependencyWait::Events(mut wait) => wait.wait(lookup, timeout, cancel).await,
            DependencyWait::Poll(deps) => poll_wait(lookup, &deps, timeout, poll_interval, cancel).await,
        }
    }
}

async fn poll_wait(
    lookup: Option<&Weak<dyn ModuleLookup>>,
    deps: &[ModuleDependency],
    timeout: Option<Duration>,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<(), WaitFailure> {
    let Some(lookup) = lookup else {
        return Err(WaitFailure::Error(ModuleError::NoRegistry));
    };
    let deadline = timeout.map(|d| Instant::now() + d);
    let past_deadline = || deadline.is_some_and(|at| Instant::now() >= at);
    let remaining = || deadline.map(|at| at.saturating_duration_since(Instant::now()));

    for dep in deps {
        let module = loop {
            let Some(registry) = lookup.upgrade() else {
                return Err(WaitFailure::Error(ModuleError::NoRegistry));
            };
            if let Some(m) = registry.find_module(&dep.module_id) {
                break m;
            }
            drop(registry);
            if past_deadline() {
                return Err(WaitFailure::Error(ModuleError::DependencyNotFound {
                    module_id: dep.module_id.clone(),
                }));
            }
            let nap = remaining().map_or(poll_interval, |r| r.min(poll_interval));
            tokio::select! {
                _ = time::sleep(nap) => {}
                _ = cancel.cancelled() => return Err(WaitFailure::Cancelled),
            }
        };

        loop {
            if module.settled_state().satisfies(dep.required_state) {
                break;
            }
            let reached = tokio::select! {
                r = module.wait_for_state(dep.required_state, remaining()) => r,
                _ = cancel.cancelled() => return Err(WaitFailure::Cancelled),
            };
            if reached {
                break;
            }
            let observed = module.settled_state();
            if observed.satisfies(dep.required_state) {
                break;
            }
            if past_deadline() {
                return Err(WaitFailure::Error(ModuleError::DependencyTimeout {
                    module_id: dep.module_id.clone(),
                    required: dep.required_state,
                    timeout: timeout.unwrap_or_default(),
                }));
            }
            if observed.aborts_wait_for(dep.required_state) {
                return Err(WaitFailure::Error(ModuleError::DependencyFailed {
                    module_id: dep.module_id.clone(),
                    required: dep.required_state,
                    observed,
                }));
            }
        }
        debug!(dependency = %dep.module_id, required = %dep.required_state, "dependency satisfied");
    }
    Ok(())
}
