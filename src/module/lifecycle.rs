//! # Module: supervised lifecycle state machine around a [`ModuleBehavior`].
//!
//! A [`Module`] owns the state of one loaded module and drives its behavior through
//! `init`, `start` and `stop`, publishing every state change on its own
//! `(local_id, "state")` bus channel.
//!
//! ```text
//! request_init(cfg) ──► [transition lock] validate, precondition, set INITIALIZING, publish
//!                            │
//!                            ▼
//!                  DependencyWait::prepare (event-driven: listeners live now)
//!                            │
//!        blocking & no event-driven deps?  ── no ──► tokio::spawn(drive) ──► return Ok(())
//!                            │ yes
//!                            ▼
//!                      drive(Init):
//!                        resolve deps ── error ──► revert to previous state, record error
//!                            │       └─ cancelled (queued stop) ──► STOPPING ──► STOPPED
//!                            ▼
//!                        behavior.init (catch_unwind)
//!                            ├─ Ok  ──► INITIALIZED ──► run queued start/stop
//!                            └─ Err ──► FAILED (error recorded)
//! ```
//!
//! ### Rules
//! - Every state change happens under the module's transition lock, and the
//!   `StateChanged` event is published while the lock is held: events of one module
//!   are delivered in transition order and listeners see `current_state() == new`.
//! - `wait_for_state` waiters are woken only after the event has been delivered, and
//!   dependents read [`Module::settled_state`]: a dependent never acts on a state
//!   whose event is still in flight.
//! - Precondition check and entry into the transitional state are one atomic step:
//!   of two concurrent identical requests exactly one runs the body, the other is a no-op.
//! - A different request arriving mid-transition is queued (stop wins over start)
//!   and runs right after the in-flight transition completes.
//! - Dependency errors revert the module to its pre-request state; body errors go to `FAILED`.
//! - `stop` always ends in `STOPPED`; its errors are recorded and logged.
//! - No lock is held across an `.await`.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::error::ModuleError;
use crate::events::{panic_message, EventBus, EventHandler, EventKind, STATE_TOPIC};
use crate::module::behavior::{BehaviorRef, ModuleContext};
use crate::module::dependency::{DependencyWait, ModuleLookup, WaitFailure};
use crate::module::{DependencyPhase, ModuleConfig, ModuleState, Phase};

/// Request queued behind the in-flight transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Start,
    Stop,
}

struct Status {
    state: ModuleState,
    error: Option<ModuleError>,
    message: Option<Arc<str>>,
    config: ModuleConfig,
    pending: Option<Pending>,
    /// Cancels the dependency wait of the in-flight transition.
    cancel: CancellationToken,
}

/// Proof that the caller holds the transition lock.
type TransitionGuard<'a> = ReentrantMutexGuard<'a, ()>;

/// Transition accepted by a `request_*` call, handed to [`Module::drive`].
struct Begun {
    previous: ModuleState,
    cancel: CancellationToken,
    config: ModuleConfig,
}

/// Point-in-time view of a module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleSnapshot {
    pub local_id: String,
    pub name: String,
    pub state: ModuleState,
    pub error: Option<ModuleError>,
    pub status_message: Option<String>,
}

/// One loaded module: behavior plus lifecycle state.
pub struct Module {
    local_id: Arc<str>,
    behavior: BehaviorRef,
    handler: EventHandler,
    runtime: RuntimeConfig,
    lookup: Option<Weak<dyn ModuleLookup>>,
    status: Mutex<Status>,
    transition: ReentrantMutex<()>,
    transitions: broadcast::Sender<ModuleState>,
}

impl Module {
    /// Creates a standalone module in `LOADED` with default runtime settings.
    ///
    /// An empty `config.id` is replaced by a generated one.
    pub fn new(config: ModuleConfig, behavior: BehaviorRef, bus: &EventBus) -> Arc<Self> {
        Self::with_runtime(config, behavior, bus, RuntimeConfig::default())
    }

    /// Creates a standalone module with explicit runtime settings.
    pub fn with_runtime(config: ModuleConfig, behavior: BehaviorRef, bus: &EventBus, runtime: RuntimeConfig) -> Arc<Self> {
        Self::build(config, behavior, bus, runtime, None)
    }

    /// Creates a module that resolves dependencies through `lookup`.
    pub(crate) fn attached(
        config: ModuleConfig,
        behavior: BehaviorRef,
        bus: &EventBus,
        runtime: RuntimeConfig,
        lookup: Weak<dyn ModuleLookup>,
    ) -> Arc<Self> {
        Self::build(config, behavior, bus, runtime, Some(lookup))
    }

    fn build(
        mut config: ModuleConfig,
        behavior: BehaviorRef,
        bus: &EventBus,
        runtime: RuntimeConfig,
        lookup: Option<Weak<dyn ModuleLookup>>,
    ) -> Arc<Self> {
        if config.id.is_empty() {
            config.id = uuid::Uuid::new_v4().to_string();
        }
        if config.name.is_empty() {
            config.name = config.id.clone();
        }
        let local_id: Arc<str> = Arc::from(config.id.as_str());
        let (transitions, _) = broadcast::channel(runtime.transition_capacity_clamped());

        Arc::new(Self {
            handler: bus.register_producer(Arc::clone(&local_id), STATE_TOPIC),
            local_id,
            behavior,
            runtime,
            lookup,
            status: Mutex::new(Status {
                state: ModuleState::Loaded,
                error: None,
                message: None,
                config,
                pending: None,
                cancel: CancellationToken::new(),
            }),
            transition: ReentrantMutex::new(()),
            transitions,
        })
    }

    /// Stable local id; also the module's producer id on the bus.
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Human-readable name from the current configuration.
    pub fn name(&self) -> String {
        self.status.lock().config.name.clone()
    }

    /// Current lifecycle state.
    pub fn current_state(&self) -> ModuleState {
        self.status.lock().state
    }

    /// State whose `StateChanged` event has been fully delivered.
    ///
    /// Waits out a transition that is being published on another thread.
    pub(crate) fn settled_state(&self) -> ModuleState {
        let _t = self.transition.lock();
        self.current_state()
    }

    /// Last recorded error, if any.
    pub fn current_error(&self) -> Option<ModuleError> {
        self.status.lock().error.clone()
    }

    /// Last status message set by the behavior, if any.
    pub fn status_message(&self) -> Option<Arc<str>> {
        self.status.lock().message.clone()
    }

    /// Configuration the module currently runs with.
    pub fn config(&self) -> ModuleConfig {
        self.status.lock().config.clone()
    }

    /// Handler of the module's `(local_id, "state")` channel.
    pub fn event_handler(&self) -> &EventHandler {
        &self.handler
    }

    /// Consistent view of id, name, state, error and status message.
    pub fn snapshot(&self) -> ModuleSnapshot {
        let st = self.status.lock();
        ModuleSnapshot {
            local_id: self.local_id.to_string(),
            name: st.config.name.clone(),
            state: st.state,
            error: st.error.clone(),
            status_message: st.message.as_deref().map(str::to_owned),
        }
    }

    /// Sets the status message and publishes `StatusChanged`.
    pub fn set_status_message(&self, message: impl Into<Arc<str>>) {
        let message = message.into();
        let _t = self.transition.lock();
        self.status.lock().message = Some(Arc::clone(&message));
        self.handler.publish(EventKind::StatusChanged { message });
    }

    /// Publishes a lifecycle event (`Loaded`, `Unloaded`) in order with state changes.
    pub(crate) fn announce(&self, kind: EventKind) {
        let _t = self.transition.lock();
        self.handler.publish(kind);
    }

    /// Flips the `enabled` flag of the current configuration.
    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.status.lock().config.enabled = enabled;
    }

    /// Requests `init` with `config`.
    ///
    /// Accepted from `LOADED`, `STOPPED` and `FAILED`; any other state makes this a no-op.
    /// An invalid configuration moves the module to `FAILED` and is returned.
    ///
    /// With `blocking = true` the call returns once the module is `INITIALIZED`,
    /// `FAILED` or reverted, except in event-driven mode with init dependencies, where
    /// it returns as soon as `INITIALIZING` is published.
    pub async fn request_init(self: &Arc<Self>, config: ModuleConfig, blocking: bool) -> Result<(), ModuleError> {
        let begun = {
            let t = self.transition.lock();
            let state = self.current_state();
            if !matches!(state, ModuleState::Loaded | ModuleState::Stopped | ModuleState::Failed) {
                debug!(module = %self.local_id, %state, "init request ignored");
                return Ok(());
            }
            let config = match self.accept_config(config) {
                Ok(c) => c,
                Err(e) => {
                    warn!(module = %self.local_id, error = %e, "init rejected");
                    let recorded = e.clone();
                    self.apply(&t, ModuleState::Failed, move |st| st.error = Some(recorded));
                    return Err(e);
                }
            };
            let cancel = CancellationToken::new();
            let (c, token) = (config.clone(), cancel.clone());
            self.apply(&t, ModuleState::Initializing, move |st| {
                st.config = c;
                st.error = None;
                st.pending = None;
                st.cancel = token;
            });
            Begun {
                previous: state,
                cancel,
                config,
            }
        };
        self.proceed(Phase::Init, begun, blocking).await
    }

    /// Requests `start`.
    ///
    /// Accepted from `INITIALIZED` and `STOPPED`. While `INITIALIZING` the start is
    /// queued behind the init; in any other state this is a no-op.
    pub async fn request_start(self: &Arc<Self>, blocking: bool) -> Result<(), ModuleError> {
        let begun = {
            let t = self.transition.lock();
            let state = self.current_state();
            match state {
                ModuleState::Initialized | ModuleState::Stopped => {}
                ModuleState::Initializing => {
                    let mut st = self.status.lock();
                    if st.pending.is_none() {
                        st.pending = Some(Pending::Start);
                        debug!(module = %self.local_id, "start queued behind init");
                    }
                    return Ok(());
                }
                _ => {
                    debug!(module = %self.local_id, %state, "start request ignored");
                    return Ok(());
                }
            }
            let cancel = CancellationToken::new();
            let token = cancel.clone();
            self.apply(&t, ModuleState::Starting, move |st| {
                st.error = None;
                st.pending = None;
                st.cancel = token;
            });
            Begun {
                previous: state,
                cancel,
                config: self.config(),
            }
        };
        self.proceed(Phase::Start, begun, blocking).await
    }

    /// Requests `stop`.
    ///
    /// `STARTED`, `INITIALIZED` and `FAILED` go through `STOPPING` to `STOPPED`.
    /// While `INITIALIZING` or `STARTING` the stop is queued and any dependency wait
    /// is cancelled. `STOPPING`, `STOPPED` and `LOADED` make this a no-op.
    ///
    /// The module reaches `STOPPED` even if the stop body fails; the failure is
    /// recorded and returned to a blocking caller.
    pub async fn request_stop(self: &Arc<Self>, blocking: bool) -> Result<(), ModuleError> {
        {
            let t = self.transition.lock();
            let state = self.current_state();
            match state {
                ModuleState::Started | ModuleState::Initialized | ModuleState::Failed => {
                    self.apply(&t, ModuleState::Stopping, |st| st.pending = None);
                }
                ModuleState::Initializing | ModuleState::Starting => {
                    let mut st = self.status.lock();
                    st.pending = Some(Pending::Stop);
                    st.cancel.cancel();
                    info!(module = %self.local_id, %state, "stop queued behind transition");
                    return Ok(());
                }
                ModuleState::Stopping | ModuleState::Stopped | ModuleState::Loaded => {
                    debug!(module = %self.local_id, %state, "stop request ignored");
                    return Ok(());
                }
            }
        }
        if blocking {
            self.run_stop().await
        } else {
            let me = Arc::clone(self);
            tokio::spawn(async move {
                let _ = me.run_stop().await;
            });
            Ok(())
        }
    }

    /// Stops the module if needed, then initializes and starts it again with the
    /// current configuration.
    ///
    /// Refused with [`ModuleError::Busy`] mid-transition. The check and the move to
    /// `STOPPING` are one step under the transition lock.
    pub async fn request_restart(self: &Arc<Self>) -> Result<(), ModuleError> {
        let stopping = {
            let t = self.transition.lock();
            let state = self.current_state();
            if state.is_transitional() {
                return Err(ModuleError::Busy { state });
            }
            let running = matches!(state, ModuleState::Started | ModuleState::Initialized | ModuleState::Failed);
            if running {
                self.apply(&t, ModuleState::Stopping, |st| st.pending = None);
            }
            running
        };
        if stopping {
            if let Err(e) = self.run_stop().await {
                warn!(module = %self.local_id, error = %e, "stop failed during restart");
            }
        }
        self.request_init(self.config(), true).await?;
        // Queued behind init when dependencies are still pending.
        self.request_start(true).await
    }

    /// Replaces the configuration and publishes `ConfigChanged`.
    ///
    /// An `INITIALIZED` module is re-initialized and a `STARTED` one restarted so the
    /// new configuration takes effect. Refused with [`ModuleError::Busy`] mid-transition.
    pub async fn update_config(self: &Arc<Self>, config: ModuleConfig) -> Result<(), ModuleError> {
        let state = {
            let _t = self.transition.lock();
            let state = self.current_state();
            if state.is_transitional() {
                return Err(ModuleError::Busy { state });
            }
            let config = self.accept_config(config)?;
            self.status.lock().config = config;
            self.handler.publish(EventKind::ConfigChanged);
            state
        };
        info!(module = %self.local_id, %state, "configuration updated");
        match state {
            ModuleState::Initialized => {
                if let Err(e) = self.request_stop(true).await {
                    warn!(module = %self.local_id, error = %e, "stop failed during reconfiguration");
                }
                self.request_init(self.config(), true).await
            }
            ModuleState::Started => self.request_restart().await,
            _ => Ok(()),
        }
    }

    /// Runs the behavior's `cleanup` body.
    ///
    /// Only allowed while the module is quiescent (`LOADED`, `STOPPED` or `FAILED`).
    pub async fn cleanup(self: &Arc<Self>) -> Result<(), ModuleError> {
        let state = self.current_state();
        if !matches!(state, ModuleState::Loaded | ModuleState::Stopped | ModuleState::Failed) {
            return Err(ModuleError::Busy { state });
        }
        let ctx = ModuleContext::new(self);
        let res = guarded(Phase::Cleanup, self.behavior.cleanup(&ctx)).await;
        if let Err(e) = &res {
            warn!(module = %self.local_id, error = %e, "cleanup failed");
            self.status.lock().error = Some(e.clone());
        }
        res
    }

    /// Waits until the module is in `target`.
    ///
    /// Returns `true` immediately if it already is. Returns `false` when `timeout`
    /// elapses, or early when a transition into `FAILED` or `STOPPED` (other than
    /// `target`) is observed. `None` waits without bound.
    pub async fn wait_for_state(&self, target: ModuleState, timeout: Option<Duration>) -> bool {
        let mut rx = self.transitions.subscribe();
        if self.settled_state() == target {
            return true;
        }
        if timeout == Some(Duration::ZERO) {
            return false;
        }
        let wait = async {
            loop {
                let seen = match rx.recv().await {
                    Ok(s) => s,
                    Err(RecvError::Lagged(_)) => self.settled_state(),
                    Err(RecvError::Closed) => return false,
                };
                if seen == target {
                    return true;
                }
                if seen.aborts_wait_for(target) {
                    return false;
                }
            }
        };
        match timeout {
            Some(d) => tokio::time::timeout(d, wait).await.unwrap_or(false),
            None => wait.await,
        }
    }

    /// Validates `config` and binds it to this module's id.
    fn accept_config(&self, mut config: ModuleConfig) -> Result<ModuleConfig, ModuleError> {
        if config.id.is_empty() {
            config.id = self.local_id.to_string();
        }
        if *config.id != *self.local_id {
            return Err(ModuleError::config(format!(
                "configuration id '{}' does not match module '{}'",
                config.id, self.local_id
            )));
        }
        if config.name.is_empty() {
            config.name = config.id.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Updates the status and publishes the state change, if any.
    ///
    /// `update` runs in the same critical section as the state write.
    fn apply(&self, _held: &TransitionGuard<'_>, new: ModuleState, update: impl FnOnce(&mut Status)) {
        let old = {
            let mut st = self.status.lock();
            update(&mut st);
            std::mem::replace(&mut st.state, new)
        };
        if old == new {
            return;
        }
        debug!(module = %self.local_id, from = %old, to = %new, "state changed");
        self.handler.publish(EventKind::StateChanged { old, new });
        let _ = self.transitions.send(new);
    }

    /// Takes the transition lock and applies `new`.
    fn transition_to(&self, new: ModuleState, update: impl FnOnce(&mut Status)) {
        let t = self.transition.lock();
        self.apply(&t, new, update);
    }

    /// Continues an accepted init/start either inline or on a spawned task.
    async fn proceed(self: &Arc<Self>, phase: Phase, begun: Begun, blocking: bool) -> Result<(), ModuleError> {
        let dep_phase = match phase {
            Phase::Init => DependencyPhase::Init,
            _ => DependencyPhase::Start,
        };
        let deps = begun.config.dependencies_for(dep_phase);
        let wait = DependencyWait::prepare(
            self.handler.bus(),
            self.lookup.as_ref(),
            deps,
            begun.config.dependency_mode,
        );

        if blocking && !wait.is_event_driven() {
            return Arc::clone(self).drive(phase, begun, wait).await;
        }
        let me = Arc::clone(self);
        tokio::spawn(async move {
            let _ = me.drive(phase, begun, wait).await;
        });
        Ok(())
    }

    /// Resolves dependencies, runs the body and settles the outcome.
    async fn drive(self: Arc<Self>, phase: Phase, begun: Begun, wait: DependencyWait) -> Result<(), ModuleError> {
        let timeout = begun
            .config
            .dependency_timeout()
            .or_else(|| self.runtime.default_dependency_timeout());
        let resolved = wait
            .resolve(
                self.lookup.as_ref(),
                timeout,
                self.runtime.poll_interval_clamped(),
                &begun.cancel,
            )
            .await;

        match resolved {
            Ok(()) => {}
            Err(WaitFailure::Cancelled) => {
                info!(module = %self.local_id, %phase, "dependency wait cancelled by stop");
                self.transition_to(ModuleState::Stopping, |st| st.pending = None);
                return self.run_stop().await;
            }
            Err(WaitFailure::Error(e)) => {
                warn!(module = %self.local_id, %phase, error = %e, revert_to = %begun.previous, "dependency resolution failed");
                let recorded = e.clone();
                let mut pending = None;
                self.transition_to(begun.previous, |st| {
                    st.error = Some(recorded);
                    pending = st.pending.take();
                });
                if pending == Some(Pending::Stop) {
                    self.spawn_followup(Pending::Stop);
                }
                return Err(e);
            }
        }

        let ctx = ModuleContext::new(&self);
        let res = match phase {
            Phase::Init => guarded(phase, self.behavior.init(&ctx, &begun.config)).await,
            _ => guarded(phase, self.behavior.start(&ctx)).await,
        };

        match res {
            Ok(()) => {
                let reached = match phase {
                    Phase::Init => ModuleState::Initialized,
                    _ => ModuleState::Started,
                };
                let mut pending = None;
                self.transition_to(reached, |st| pending = st.pending.take());
                info!(module = %self.local_id, state = %reached, "transition completed");
                if let Some(p) = pending {
                    self.spawn_followup(p);
                }
                Ok(())
            }
            Err(e) => {
                warn!(module = %self.local_id, %phase, error = %e, "module failed");
                let recorded = e.clone();
                let mut pending = None;
                self.transition_to(ModuleState::Failed, |st| {
                    st.error = Some(recorded);
                    pending = st.pending.take();
                });
                if pending == Some(Pending::Stop) {
                    self.spawn_followup(Pending::Stop);
                }
                Err(e)
            }
        }
    }

    /// Runs the stop body; the module is already `STOPPING`.
    async fn run_stop(self: &Arc<Self>) -> Result<(), ModuleError> {
        let ctx = ModuleContext::new(self);
        let res = guarded(Phase::Stop, self.behavior.stop(&ctx)).await;
        match &res {
            Ok(()) => self.transition_to(ModuleState::Stopped, |_| {}),
            Err(e) => {
                warn!(module = %self.local_id, error = %e, "stop failed, module stopped anyway");
                let recorded = e.clone();
                self.transition_to(ModuleState::Stopped, |st| st.error = Some(recorded));
            }
        }
        info!(module = %self.local_id, "module stopped");
        res
    }

    fn spawn_followup(self: &Arc<Self>, pending: Pending) {
        let me = Arc::clone(self);
        tokio::spawn(async move {
            let res = match pending {
                Pending::Start => me.request_start(true).await,
                Pending::Stop => me.request_stop(true).await,
            };
            if let Err(e) = res {
                debug!(module = %me.local_id, ?pending, error = %e, "queued request failed");
            }
        });
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("local_id", &self.local_id)
            .field("state", &self.current_state())
            .field("attached", &self.lookup.is_some())
            .finish()
    }
}

/// Runs a lifecycle body, turning a panic into [`ModuleError::Panicked`].
async fn guarded<F>(phase: Phase, body: F) -> Result<(), ModuleError>
where
    F: Future<Output = Result<(), ModuleError>>,
{
    match AssertUnwindSafe(body).catch_unwind().await {
        Ok(res) => res,
        Err(payload) => Err(ModuleError::Panicked {
            phase,
            info: panic_message(payload.as_ref()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listeners::{ListenerFn, ListenerRef};
    use crate::events::Event;
    use async_trait::async_trait;
    use crate::module::ModuleBehavior;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[derive(Default)]
    struct Scripted {
        init_delay_ms: u64,
        stop_delay_ms: u64,
        fail_init: bool,
        fail_stop: bool,
        panic_start: bool,
        inits: AtomicUsize,
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl ModuleBehavior for Scripted {
        async fn init(&self, _ctx: &ModuleContext<'_>, _config: &ModuleConfig) -> Result<(), ModuleError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            if self.init_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.init_delay_ms)).await;
            }
            if self.fail_init {
                return Err(ModuleError::execution(Phase::Init, "device not found"));
            }
            Ok(())
        }

        async fn start(&self, _ctx: &ModuleContext<'_>) -> Result<(), ModuleError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.panic_start {
                panic!("start exploded");
            }
            Ok(())
        }

        async fn stop(&self, _ctx: &ModuleContext<'_>) -> Result<(), ModuleError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if self.stop_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.stop_delay_ms)).await;
            }
            if self.fail_stop {
                return Err(ModuleError::execution(Phase::Stop, "port busy"));
            }
            Ok(())
        }
    }

    fn module(scripted: Arc<Scripted>, bus: &EventBus) -> Arc<Module> {
        Module::new(ModuleConfig::new("m", "scripted"), scripted, bus)
    }

    fn record_states(bus: &EventBus, producer: &str) -> Arc<Mutex<Vec<(ModuleState, ModuleState)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let l: ListenerRef = ListenerFn::arc("recorder", move |ev: &Event| {
            if let EventKind::StateChanged { old, new } = ev.kind {
                s.lock().push((old, new));
            }
        });
        bus.register_listener(producer, STATE_TOPIC, l);
        seen
    }

    #[tokio::test]
    async fn test_full_cycle_publishes_transitions_in_order() {
        let bus = EventBus::new();
        let seen = record_states(&bus, "m");
        let scripted = Arc::new(Scripted::default());
        let m = module(Arc::clone(&scripted), &bus);

        m.request_init(m.config(), true).await.unwrap();
        m.request_start(true).await.unwrap();
        m.request_stop(true).await.unwrap();

        use ModuleState::*;
        assert_eq!(
            *seen.lock(),
            vec![
                (Loaded, Initializing),
                (Initializing, Initialized),
                (Initialized, Starting),
                (Starting, Started),
                (Started, Stopping),
                (Stopping, Stopped),
            ]
        );
        assert_eq!(scripted.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_listener_sees_new_state_as_current() {
        let bus = EventBus::new();
        let scripted = Arc::new(Scripted::default());
        let m = module(scripted, &bus);

        let mismatches = Arc::new(AtomicUsize::new(0));
        let (mm, weak) = (Arc::clone(&mismatches), Arc::downgrade(&m));
        let l: ListenerRef = ListenerFn::arc("consistency", move |ev: &Event| {
            let (Some(new), Some(m)) = (ev.new_state(), weak.upgrade()) else {
                return;
            };
            if m.current_state() != new {
                mm.fetch_add(1, Ordering::SeqCst);
            }
        });
        m.event_handler().register_listener(l);

        m.request_init(m.config(), true).await.unwrap();
        m.request_start(true).await.unwrap();
        assert_eq!(mismatches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_init_runs_body_once() {
        let bus = EventBus::new();
        let scripted = Arc::new(Scripted {
            init_delay_ms: 100,
            ..Scripted::default()
        });
        let m = module(Arc::clone(&scripted), &bus);

        let begin = Instant::now();
        let (a, b) = tokio::join!(
            m.request_init(m.config(), true),
            m.request_init(m.config(), true)
        );
        a.unwrap();
        b.unwrap();
        assert!(m.wait_for_state(ModuleState::Initialized, Some(Duration::from_secs(1))).await);
        assert!(begin.elapsed() < Duration::from_millis(200));
        assert_eq!(scripted.inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_for_state_returns_once_reached() {
        let bus = EventBus::new();
        let scripted = Arc::new(Scripted {
            init_delay_ms: 100,
            ..Scripted::default()
        });
        let m = module(scripted, &bus);

        let begin = Instant::now();
        m.request_init(m.config(), false).await.unwrap();
        assert!(m.wait_for_state(ModuleState::Initialized, Some(Duration::from_millis(200))).await);
        let took = begin.elapsed();
        assert!(took >= Duration::from_millis(100));
        assert!(took < Duration::from_millis(200));

        assert!(m.wait_for_state(ModuleState::Initialized, Some(Duration::ZERO)).await);
        assert!(!m.wait_for_state(ModuleState::Started, Some(Duration::from_millis(20))).await);
    }

    #[tokio::test]
    async fn test_wait_aborts_on_failure() {
        let bus = EventBus::new();
        let scripted = Arc::new(Scripted {
            init_delay_ms: 20,
            fail_init: true,
            ..Scripted::default()
        });
        let m = module(scripted, &bus);

        m.request_init(m.config(), false).await.unwrap();
        let begin = Instant::now();
        assert!(!m.wait_for_state(ModuleState::Initialized, None).await);
        assert!(begin.elapsed() < Duration::from_secs(1));
        assert_eq!(m.current_state(), ModuleState::Failed);
    }

    #[tokio::test]
    async fn test_init_failure_is_recorded() {
        let bus = EventBus::new();
        let scripted = Arc::new(Scripted {
            fail_init: true,
            ..Scripted::default()
        });
        let m = module(scripted, &bus);

        let err = m.request_init(m.config(), true).await.unwrap_err();
        assert_eq!(err, ModuleError::execution(Phase::Init, "device not found"));
        assert_eq!(m.current_state(), ModuleState::Failed);
        assert_eq!(m.current_error(), Some(err));

        // FAILED → STOPPED through stop.
        m.request_stop(true).await.unwrap();
        assert_eq!(m.current_state(), ModuleState::Stopped);
    }

    #[tokio::test]
    async fn test_start_panic_becomes_failed() {
        let bus = EventBus::new();
        let scripted = Arc::new(Scripted {
            panic_start: true,
            ..Scripted::default()
        });
        let m = module(scripted, &bus);

        m.request_init(m.config(), true).await.unwrap();
        let err = m.request_start(true).await.unwrap_err();
        assert!(matches!(err, ModuleError::Panicked { phase: Phase::Start, .. }));
        assert_eq!(m.current_state(), ModuleState::Failed);
    }

    #[tokio::test]
    async fn test_stop_failure_still_reaches_stopped() {
        let bus = EventBus::new();
        let scripted = Arc::new(Scripted {
            fail_stop: true,
            ..Scripted::default()
        });
        let m = module(scripted, &bus);

        m.request_init(m.config(), true).await.unwrap();
        m.request_start(true).await.unwrap();
        assert!(m.request_stop(true).await.is_err());
        assert_eq!(m.current_state(), ModuleState::Stopped);
        assert!(matches!(m.current_error(), Some(ModuleError::Execution { phase: Phase::Stop, .. })));
    }

    #[tokio::test]
    async fn test_redundant_stop_publishes_nothing() {
        let bus = EventBus::new();
        let seen = record_states(&bus, "m");
        let scripted = Arc::new(Scripted::default());
        let m = module(Arc::clone(&scripted), &bus);

        m.request_stop(true).await.unwrap();
        m.request_init(m.config(), true).await.unwrap();
        m.request_stop(true).await.unwrap();
        let published = seen.lock().len();
        m.request_stop(true).await.unwrap();

        assert_eq!(seen.lock().len(), published);
        assert_eq!(scripted.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_module() {
        let bus = EventBus::new();
        let m = module(Arc::new(Scripted::default()), &bus);

        let bad = ModuleConfig::new("m", "");
        let err = m.request_init(bad, true).await.unwrap_err();
        assert!(matches!(err, ModuleError::Config { .. }));
        assert_eq!(m.current_state(), ModuleState::Failed);

        let other = ModuleConfig::new("other", "scripted");
        assert!(m.request_init(other, true).await.is_err());
    }

    #[tokio::test]
    async fn test_start_is_queued_behind_init() {
        let bus = EventBus::new();
        let scripted = Arc::new(Scripted {
            init_delay_ms: 50,
            ..Scripted::default()
        });
        let m = module(Arc::clone(&scripted), &bus);

        m.request_init(m.config(), false).await.unwrap();
        m.request_start(false).await.unwrap();
        assert!(m.wait_for_state(ModuleState::Started, Some(Duration::from_secs(1))).await);
        assert_eq!(scripted.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_is_queued_behind_init() {
        let bus = EventBus::new();
        let scripted = Arc::new(Scripted {
            init_delay_ms: 50,
            ..Scripted::default()
        });
        let m = module(Arc::clone(&scripted), &bus);

        m.request_init(m.config(), false).await.unwrap();
        m.request_start(false).await.unwrap();
        m.request_stop(false).await.unwrap();
        assert!(m.wait_for_state(ModuleState::Stopped, Some(Duration::from_secs(1))).await);
        assert_eq!(scripted.starts.load(Ordering::SeqCst), 0);
        assert_eq!(scripted.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restart_and_busy() {
        let bus = EventBus::new();
        let scripted = Arc::new(Scripted::default());
        let m = module(Arc::clone(&scripted), &bus);

        m.request_init(m.config(), true).await.unwrap();
        m.request_start(true).await.unwrap();
        m.request_restart().await.unwrap();
        assert_eq!(m.current_state(), ModuleState::Started);
        assert_eq!(scripted.inits.load(Ordering::SeqCst), 2);
        assert_eq!(scripted.stops.load(Ordering::SeqCst), 1);

        assert!(matches!(m.cleanup().await, Err(ModuleError::Busy { .. })));
        m.request_stop(true).await.unwrap();
        m.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_config_restarts_running_module() {
        let bus = EventBus::new();
        let scripted = Arc::new(Scripted::default());
        let m = module(Arc::clone(&scripted), &bus);
        m.request_init(m.config(), true).await.unwrap();
        m.request_start(true).await.unwrap();

        let changed = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&changed);
        let l: ListenerRef = ListenerFn::arc("config", move |ev: &Event| {
            if ev.kind == EventKind::ConfigChanged {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        m.event_handler().register_listener(l);

        let cfg = m.config().with_property("rate", 10u64);
        m.update_config(cfg).await.unwrap();
        assert_eq!(changed.load(Ordering::SeqCst), 1);
        assert_eq!(m.config().property_u64("rate"), Some(10));
        assert_eq!(m.current_state(), ModuleState::Started);
        assert_eq!(scripted.inits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_status_message_is_published() {
        let bus = EventBus::new();
        let m = module(Arc::new(Scripted::default()), &bus);
        let got = Arc::new(Mutex::new(None));
        let g = Arc::clone(&got);
        let l: ListenerRef = ListenerFn::arc("status", move |ev: &Event| {
            if let EventKind::StatusChanged { message } = &ev.kind {
                *g.lock() = Some(message.to_string());
            }
        });
        m.event_handler().register_listener(l);

        m.set_status_message("calibrating");
        assert_eq!(got.lock().as_deref(), Some("calibrating"));
        assert_eq!(m.snapshot().status_message.as_deref(), Some("calibrating"));
    }

    #[tokio::test]
    async fn test_generated_id_when_missing() {
        let bus = EventBus::new();
        let m = Module::new(ModuleConfig::new("", "scripted"), Arc::new(Scripted::default()), &bus);
        assert!(!m.local_id().is_empty());
        assert_eq!(m.config().id, m.local_id());
        assert_eq!(m.name(), m.local_id());
    }

    #[tokio::test]
    async fn test_poll_wait_without_registry() {
        let bus = EventBus::new();
        let cfg = ModuleConfig::new("m", "scripted")
            .with_dependency_mode(crate::module::DependencyMode::PollWait)
            .with_dependency(crate::module::ModuleDependency::new("dep", ModuleState::Started));
        let m = Module::new(cfg, Arc::new(Scripted::default()), &bus);

        let err = m.request_init(m.config(), true).await.unwrap_err();
        assert_eq!(err, ModuleError::NoRegistry);
        assert_eq!(m.current_state(), ModuleState::Loaded);
    }

    #[tokio::test]
    async fn test_event_driven_without_registry() {
        let bus = EventBus::new();
        let dep = module(Arc::new(Scripted::default()), &bus);
        dep.request_init(dep.config(), true).await.unwrap();
        dep.request_start(true).await.unwrap();

        let cfg = ModuleConfig::new("n", "scripted")
            .with_dependency(crate::module::ModuleDependency::new("m", ModuleState::Started));
        let n = Module::new(cfg, Arc::new(Scripted::default()), &bus);

        let err = n.request_init(n.config(), true).await.unwrap_err();
        assert_eq!(err, ModuleError::NoRegistry);
        assert_eq!(n.current_state(), ModuleState::Loaded);
        assert_eq!(bus.listener_count("m", STATE_TOPIC), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_wait_for_state_covers_delayed_request_and_init() {
        let bus = EventBus::new();
        let scripted = Arc::new(Scripted {
            init_delay_ms: 200,
            ..Scripted::default()
        });
        let m = module(scripted, &bus);

        let begin = Instant::now();
        let late = Arc::clone(&m);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            late.request_init(late.config(), false).await.unwrap();
        });

        assert!(m.wait_for_state(ModuleState::Initialized, Some(Duration::from_millis(5000))).await);
        assert!(begin.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_init_when_initialized_is_noop() {
        let bus = EventBus::new();
        let seen = record_states(&bus, "m");
        let scripted = Arc::new(Scripted::default());
        let m = module(Arc::clone(&scripted), &bus);

        m.request_init(m.config(), true).await.unwrap();
        let published = seen.lock().len();
        m.request_init(m.config(), true).await.unwrap();

        assert_eq!(m.current_state(), ModuleState::Initialized);
        assert_eq!(scripted.inits.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().len(), published);
    }

    #[tokio::test]
    async fn test_concurrent_restart_is_busy() {
        let bus = EventBus::new();
        let scripted = Arc::new(Scripted {
            stop_delay_ms: 50,
            ..Scripted::default()
        });
        let m = module(Arc::clone(&scripted), &bus);
        m.request_init(m.config(), true).await.unwrap();
        m.request_start(true).await.unwrap();

        let (first, second) = tokio::join!(m.request_restart(), m.request_restart());
        first.unwrap();
        assert_eq!(second, Err(ModuleError::Busy { state: ModuleState::Stopping }));
        assert_eq!(m.current_state(), ModuleState::Started);
        assert_eq!(scripted.stops.load(Ordering::SeqCst), 1);
        assert_eq!(scripted.inits.load(Ordering::SeqCst), 2);
    }
}
