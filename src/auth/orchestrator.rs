//! Orchestrator façade
//!
//! Owns the request lifecycle: starts every selected module in parallel,
//! routes their events through the restart policy and the aggregator, arms
//! the deadline and tears everything down exactly once.
//!
//! Concurrency model: all mutable state sits behind one mutex. Handlers
//! decide what to do while holding it and collect the side effects (module
//! calls, presenter calls, lockout writes, timer scheduling, the final
//! callback) into a list that runs after the lock is released. Module events
//! may therefore arrive synchronously from inside `authenticate()` or
//! `cancel()`, from any thread, without deadlocking.
//!
//! Teardown order: state leaves Running, timers are dropped, every module is
//! canceled, the UI is closed, the orchestrator returns to Idle and only then
//! the verdict is delivered. A callback may call `start()` again.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;

use super::aggregator::{Decision, ResultAggregator};
use super::error::OrchestratorError;
use super::lockout::{LockoutStatus, LockoutTracker};
use super::module::{guarded_authenticate, guarded_cancel, guarded_probe, AuthenticatorModule, ResultSink};
use super::presenter::{LogPresenter, Presenter};
use super::registry::ModuleRegistry;
use super::restart::{LockoutAction, ModuleHistory, RestartConfig, RestartDecision, RestartPolicy};
use super::timer::{Clock, SystemClock, ThreadTimer, Timer, TimerHandle};
use super::types::{
    AttemptResult, CancelReason, ConfirmationPolicy, FailureReason, ModuleId, RequestId, Verdict,
};
use crate::validation::{validate_debounce_ms, validate_help_text, validate_timeout_ms, ValidationError};

/// Orchestrator defaults, also used by the CLI when flags are absent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Overall attempt deadline (ms)
    pub timeout_ms: u64,
    /// Identical terminal events from one module within this window are
    /// coalesced (ms)
    pub debounce_ms: u64,
    pub policy: ConfirmationPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            debounce_ms: 100,
            policy: ConfirmationPolicy::Any,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_timeout_ms(self.timeout_ms)?;
        validate_debounce_ms(self.debounce_ms)?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Starting,
    Running,
    Sealed,
    Canceled,
    TimedOut,
}

impl OrchestratorState {
    /// Starting or Running
    pub fn is_in_flight(&self) -> bool {
        matches!(self, OrchestratorState::Starting | OrchestratorState::Running)
    }
}

pub type VerdictCallback = Box<dyn FnOnce(Verdict) + Send + 'static>;

pub struct OrchestratorBuilder {
    registry: ModuleRegistry,
    lockout: Arc<LockoutTracker>,
    config: OrchestratorConfig,
    restart: RestartConfig,
    presenter: Arc<dyn Presenter>,
    clock: Arc<dyn Clock>,
    timer: Arc<dyn Timer>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn restart(mut self, restart: RestartConfig) -> Self {
        self.restart = restart;
        self
    }

    pub fn presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = presenter;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    pub fn build(self) -> Orchestrator {
        log::debug!(
            "Orchestrator ready: {} module(s) registered, debounce={}ms",
            self.registry.len(),
            self.config.debounce_ms
        );
        Orchestrator {
            inner: Arc::new(Inner {
                registry: self.registry,
                lockout: self.lockout,
                restart: RestartPolicy::new(self.restart),
                config: self.config,
                presenter: self.presenter,
                clock: self.clock,
                timer: self.timer,
                control: Mutex::new(Control {
                    state: OrchestratorState::Idle,
                    current: None,
                    active: None,
                }),
            }),
        }
    }
}

/// Handles at most one authentication request at a time
///
/// Dropping the orchestrator cancels an in-flight request with
/// [`CancelReason::Shutdown`].
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder(registry: ModuleRegistry, lockout: Arc<LockoutTracker>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            registry,
            lockout,
            config: OrchestratorConfig::default(),
            restart: RestartConfig::default(),
            presenter: Arc::new(LogPresenter),
            clock: Arc::new(SystemClock),
            timer: Arc::new(ThreadTimer),
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.inner.lock().state
    }

    /// Request currently owning the orchestrator (in flight or tearing down)
    pub fn active_request(&self) -> Option<RequestId> {
        self.inner.lock().current
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.inner.registry
    }

    pub fn lockout(&self) -> &Arc<LockoutTracker> {
        &self.inner.lockout
    }

    /// Begin an authentication request
    ///
    /// Returns once every module has been started. The callback is invoked
    /// exactly once with the verdict, possibly before this returns.
    pub fn start<F>(
        &self,
        modules: &[ModuleId],
        policy: ConfirmationPolicy,
        timeout: Duration,
        callback: F,
    ) -> Result<RequestId, OrchestratorError>
    where
        F: FnOnce(Verdict) + Send + 'static,
    {
        let timeout_ms = validate_timeout_ms(timeout.as_millis().min(u64::MAX as u128) as u64)?;
        let resolved = self.inner.registry.resolve(modules)?;
        let inner = &self.inner;

        let request = {
            let mut control = inner.lock();
            if let Some(active) = control.current {
                return Err(OrchestratorError::AlreadyRunning { active });
            }

            let request = RequestId::next();
            let now = inner.clock.now_ms();
            let module_set = resolved.iter().map(|(id, _)| id.clone()).collect();
            control.state = OrchestratorState::Starting;
            control.current = Some(request);
            control.active = Some(ActiveAttempt {
                aggregator: ResultAggregator::new(request, module_set, policy),
                slots: resolved
                    .iter()
                    .map(|(id, module)| ModuleSlot::new(id.clone(), Arc::clone(module)))
                    .collect(),
                callback: Some(Box::new(callback)),
                deadline: None,
                started_at_ms: now,
            });
            request
        };

        log::info!(
            "[{}] Starting authentication: modules={:?}, policy={}, timeout={}ms",
            request,
            resolved.iter().map(|(id, _)| id.to_string()).collect::<Vec<_>>(),
            policy,
            timeout_ms
        );

        inner.presenter.on_ui_opened(request);

        // Lockout and probe gating run outside the lock; module code is foreign
        let gates: Vec<Option<FailureReason>> = resolved
            .iter()
            .map(|(id, module)| inner.gate(request, id, module.as_ref()))
            .collect();

        let weak = Arc::downgrade(inner);
        let deadline = inner.timer.schedule(
            Duration::from_millis(timeout_ms),
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_deadline(request);
                }
            }),
        );

        let effects = {
            let mut control = inner.lock();
            inner.admit(&mut control, request, gates, deadline)
        };
        inner.run(effects);

        {
            let mut control = inner.lock();
            if control.current == Some(request) && control.state == OrchestratorState::Starting {
                control.state = OrchestratorState::Running;
                log::info!("✓ [{}] All modules started", request);
            }
        }

        Ok(request)
    }

    /// Like [`Orchestrator::start`], but the verdict arrives as a future
    pub fn start_async(
        &self,
        modules: &[ModuleId],
        policy: ConfirmationPolicy,
        timeout: Duration,
    ) -> Result<PendingVerdict, OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        let request = self.start(modules, policy, timeout, move |verdict| {
            // Receiver dropped means nobody is waiting any more
            let _ = tx.send(verdict);
        })?;
        Ok(PendingVerdict { request, rx })
    }

    /// Cancel the in-flight request, if any
    ///
    /// Returns `true` if this call ended a request. Repeated calls, and calls
    /// after a verdict was sealed, do nothing.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let teardown = {
            let mut control = self.inner.lock();
            if !control.state.is_in_flight() {
                log::debug!("Cancel ({}) ignored: nothing in flight", reason);
                return false;
            }
            let terminal = if reason == CancelReason::Timeout {
                OrchestratorState::TimedOut
            } else {
                OrchestratorState::Canceled
            };
            self.inner
                .finish(&mut control, Verdict::Canceled(reason), terminal)
        };

        match teardown {
            Some(teardown) => {
                self.inner.teardown(teardown);
                true
            }
            None => false,
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if self.cancel(CancelReason::Shutdown) {
            log::info!("In-flight authentication canceled on shutdown");
        }
    }
}

/// Verdict of a request started with [`Orchestrator::start_async`]
///
/// Resolves to `Canceled(Shutdown)` if the orchestrator goes away without
/// delivering.
#[derive(Debug)]
pub struct PendingVerdict {
    request: RequestId,
    rx: oneshot::Receiver<Verdict>,
}

impl PendingVerdict {
    pub fn request(&self) -> RequestId {
        self.request
    }
}

impl Future for PendingVerdict {
    type Output = Verdict;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|delivered| delivered.unwrap_or(Verdict::Canceled(CancelReason::Shutdown)))
    }
}

struct Inner {
    registry: ModuleRegistry,
    lockout: Arc<LockoutTracker>,
    restart: RestartPolicy,
    config: OrchestratorConfig,
    presenter: Arc<dyn Presenter>,
    clock: Arc<dyn Clock>,
    timer: Arc<dyn Timer>,
    control: Mutex<Control>,
}

struct Control {
    state: OrchestratorState,
    /// Set from `start()` until the orchestrator is back to Idle
    current: Option<RequestId>,
    /// Present only while the request is in flight
    active: Option<ActiveAttempt>,
}

struct ActiveAttempt {
    aggregator: ResultAggregator,
    slots: Vec<ModuleSlot>,
    callback: Option<VerdictCallback>,
    deadline: Option<TimerHandle>,
    started_at_ms: u64,
}

struct ModuleSlot {
    id: ModuleId,
    module: Arc<dyn AuthenticatorModule>,
    /// Bumped on every restart; sinks from older invocations go quiet
    invocation: u64,
    /// The module's terminal result has been handed to the aggregator
    settled: bool,
    history: ModuleHistory,
    /// (invocation, at_ms, result); a restarted invocation starts clean
    last_terminal: Option<(u64, u64, AttemptResult)>,
    retry: Option<TimerHandle>,
}

impl ModuleSlot {
    fn new(id: ModuleId, module: Arc<dyn AuthenticatorModule>) -> Self {
        Self {
            id,
            module,
            invocation: 0,
            settled: false,
            history: ModuleHistory::default(),
            last_terminal: None,
            retry: None,
        }
    }
}

/// Work decided under the lock and performed after releasing it
enum Effect {
    Launch {
        request: RequestId,
        index: usize,
        invocation: u64,
        module: Arc<dyn AuthenticatorModule>,
    },
    ScheduleRetry {
        request: RequestId,
        index: usize,
        invocation: u64,
        delay: Duration,
    },
    Help {
        module: ModuleId,
        text: String,
    },
    Lockout {
        module: ModuleId,
        action: LockoutAction,
    },
    Finish(Teardown),
}

struct Teardown {
    request: RequestId,
    verdict: Verdict,
    callback: Option<VerdictCallback>,
    modules: Vec<Arc<dyn AuthenticatorModule>>,
    timers: Vec<TimerHandle>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_active(&self, request: RequestId) -> bool {
        self.lock()
            .active
            .as_ref()
            .is_some_and(|active| active.aggregator.request_id() == request)
    }

    /// Reason a module cannot take part in this attempt, if any
    fn gate(
        &self,
        request: RequestId,
        id: &ModuleId,
        module: &dyn AuthenticatorModule,
    ) -> Option<FailureReason> {
        let reason = match self.lockout.status(id) {
            LockoutStatus::Permanent => Some(FailureReason::LockedOutPermanent),
            LockoutStatus::Temporary { remaining_ms } => {
                log::info!("[{}] {} locked out for another {}ms", request, id, remaining_ms);
                Some(FailureReason::LockedOut)
            }
            LockoutStatus::Unlocked => guarded_probe(module).failure(),
        };

        if let Some(reason) = reason {
            log::warn!("[{}] Skipping {}: {}", request, id, reason);
        }
        reason
    }

    /// Store the deadline, record gating failures and plan the launches
    fn admit(
        &self,
        control: &mut Control,
        request: RequestId,
        gates: Vec<Option<FailureReason>>,
        deadline: TimerHandle,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        let mut sealed = None;

        {
            let Some(active) = control
                .active
                .as_mut()
                .filter(|active| active.aggregator.request_id() == request)
            else {
                // Ended while gating; dropping the handle disarms the deadline
                return effects;
            };
            active.deadline = Some(deadline);

            for (index, gate) in gates.into_iter().enumerate() {
                let slot = &mut active.slots[index];
                match gate {
                    Some(reason) => {
                        slot.settled = true;
                        let decision =
                            active
                                .aggregator
                                .record(&slot.id, AttemptResult::Failure(reason), request);
                        if let Decision::Sealed(verdict) = decision {
                            sealed = Some(verdict);
                            break;
                        }
                    }
                    None => effects.push(Effect::Launch {
                        request,
                        index,
                        invocation: slot.invocation,
                        module: Arc::clone(&slot.module),
                    }),
                }
            }
        }

        if let Some(verdict) = sealed {
            effects.clear();
            effects.extend(
                self.finish(control, verdict, OrchestratorState::Sealed)
                    .map(Effect::Finish),
            );
        }
        effects
    }

    fn on_result(self: &Arc<Self>, request: RequestId, index: usize, invocation: u64, result: AttemptResult) {
        let effects = {
            let mut control = self.lock();
            self.apply(&mut control, request, index, invocation, result)
        };
        self.run(effects);
    }

    fn apply(
        &self,
        control: &mut Control,
        request: RequestId,
        index: usize,
        invocation: u64,
        result: AttemptResult,
    ) -> Vec<Effect> {
        let now = self.clock.now_ms();
        let mut effects = Vec::new();
        let result = result.normalized();

        let decision = {
            let Some(active) = control
                .active
                .as_mut()
                .filter(|active| active.aggregator.request_id() == request)
            else {
                log::debug!("Dropping {:?} for inactive {}", result, request);
                return effects;
            };
            let Some(slot) = active.slots.get_mut(index) else {
                return effects;
            };

            if slot.invocation != invocation {
                log::debug!(
                    "[{}] Dropping {:?} from superseded {} invocation {}",
                    request,
                    result,
                    slot.id,
                    invocation
                );
                return effects;
            }
            if slot.settled {
                log::debug!("[{}] {} already settled; dropping {:?}", request, slot.id, result);
                return effects;
            }

            if result.is_terminal() {
                if let Some((seen_in, at, last)) = &slot.last_terminal {
                    if *seen_in == invocation
                        && now.saturating_sub(*at) < self.config.debounce_ms
                        && *last == result
                    {
                        log::debug!("[{}] Coalescing repeated {:?} from {}", request, result, slot.id);
                        return effects;
                    }
                }
                slot.last_terminal = Some((invocation, now, result.clone()));
            }

            match result {
                AttemptResult::Help(text) => {
                    active
                        .aggregator
                        .record(&slot.id, AttemptResult::Help(text.clone()), request);
                    effects.push(Effect::Help {
                        module: slot.id.clone(),
                        text,
                    });
                    return effects;
                }
                AttemptResult::Failure(reason) => match self.restart.decide(reason, &slot.history) {
                    RestartDecision::RetryNow => {
                        slot.history.note_restart(reason);
                        slot.invocation += 1;
                        log::warn!("[{}] {} failed ({}); retrying", request, slot.id, reason);
                        effects.push(Effect::Launch {
                            request,
                            index,
                            invocation: slot.invocation,
                            module: Arc::clone(&slot.module),
                        });
                        return effects;
                    }
                    RestartDecision::RetryAfter(delay) => {
                        slot.history.note_restart(reason);
                        slot.invocation += 1;
                        log::warn!(
                            "[{}] {} failed ({}); retrying in {}ms",
                            request,
                            slot.id,
                            reason,
                            delay.as_millis()
                        );
                        effects.push(Effect::ScheduleRetry {
                            request,
                            index,
                            invocation: slot.invocation,
                            delay,
                        });
                        return effects;
                    }
                    RestartDecision::Fatal { reason, lockout } => {
                        slot.settled = true;
                        if let Some(action) = lockout {
                            effects.push(Effect::Lockout {
                                module: slot.id.clone(),
                                action,
                            });
                        }
                        log::info!("[{}] {} finished: {}", request, slot.id, reason);
                        active
                            .aggregator
                            .record(&slot.id, AttemptResult::Failure(reason), request)
                    }
                },
                terminal => {
                    slot.settled = true;
                    log::info!("[{}] {} finished: {:?}", request, slot.id, terminal);
                    active.aggregator.record(&slot.id, terminal, request)
                }
            }
        };

        if let Decision::Sealed(verdict) = decision {
            effects.extend(
                self.finish(control, verdict, OrchestratorState::Sealed)
                    .map(Effect::Finish),
            );
        }
        effects
    }

    /// Leave the in-flight state and package what teardown needs
    ///
    /// Returns `None` if nothing is in flight.
    fn finish(
        &self,
        control: &mut Control,
        verdict: Verdict,
        terminal: OrchestratorState,
    ) -> Option<Teardown> {
        let mut active = control.active.take()?;
        let request = active.aggregator.request_id();
        control.state = terminal;

        let mut timers: Vec<TimerHandle> = active.deadline.take().into_iter().collect();
        timers.extend(active.slots.iter_mut().filter_map(|slot| slot.retry.take()));

        log::info!(
            "[{}] {:?} after {}ms: {:?}",
            request,
            terminal,
            self.clock.now_ms().saturating_sub(active.started_at_ms),
            verdict
        );

        Some(Teardown {
            request,
            verdict,
            callback: active.callback.take(),
            modules: active
                .slots
                .iter()
                .map(|slot| Arc::clone(&slot.module))
                .collect(),
            timers,
        })
    }

    fn teardown(&self, teardown: Teardown) {
        let Teardown {
            request,
            verdict,
            callback,
            modules,
            timers,
        } = teardown;

        for timer in timers {
            timer.cancel();
        }

        // Every module gets cancel(), including ones that already finished
        for module in &modules {
            guarded_cancel(module.as_ref());
        }

        self.presenter.on_ui_closed(request);

        {
            let mut control = self.lock();
            if control.current == Some(request) {
                control.state = OrchestratorState::Idle;
                control.current = None;
            }
        }

        match callback {
            Some(callback) => {
                if catch_unwind(AssertUnwindSafe(move || callback(verdict))).is_err() {
                    log::error!("[{}] Verdict callback panicked", request);
                }
            }
            None => log::error!("[{}] Verdict sealed without a callback", request),
        }
    }

    fn run(self: &Arc<Self>, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Launch {
                    request,
                    index,
                    invocation,
                    module,
                } => self.launch(request, index, invocation, module),
                Effect::ScheduleRetry {
                    request,
                    index,
                    invocation,
                    delay,
                } => self.schedule_retry(request, index, invocation, delay),
                Effect::Help { module, text } => match validate_help_text(&text) {
                    Ok(text) => self.presenter.on_help(&module, &text),
                    Err(e) => log::debug!("Dropping help text from {}: {}", module, e),
                },
                Effect::Lockout { module, action } => match action {
                    LockoutAction::Temporary(duration) => {
                        self.lockout.mark_locked_out(&module, duration)
                    }
                    LockoutAction::Permanent => self.lockout.mark_locked_out_permanent(&module),
                },
                Effect::Finish(teardown) => self.teardown(teardown),
            }
        }
    }

    fn sink(self: &Arc<Self>, request: RequestId, index: usize, invocation: u64) -> ResultSink {
        let weak = Arc::downgrade(self);
        ResultSink::new(move |result| {
            if let Some(inner) = weak.upgrade() {
                inner.on_result(request, index, invocation, result);
            }
        })
    }

    fn launch(
        self: &Arc<Self>,
        request: RequestId,
        index: usize,
        invocation: u64,
        module: Arc<dyn AuthenticatorModule>,
    ) {
        if !self.is_active(request) {
            return;
        }

        log::debug!("[{}] Invoking {} (invocation {})", request, module.id(), invocation);
        guarded_authenticate(module.as_ref(), self.sink(request, index, invocation));

        // Teardown may have broadcast cancel() before this invocation began
        if self.launch_orphaned(request) {
            guarded_cancel(module.as_ref());
        }
    }

    /// The launch outlived its request and no later request owns the module
    fn launch_orphaned(&self, request: RequestId) -> bool {
        let control = self.lock();
        match control.current {
            None => true,
            Some(current) if current == request => control.active.is_none(),
            Some(_) => false,
        }
    }

    fn schedule_retry(self: &Arc<Self>, request: RequestId, index: usize, invocation: u64, delay: Duration) {
        let weak = Arc::downgrade(self);
        let handle = self.timer.schedule(
            delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.fire_retry(request, index, invocation);
                }
            }),
        );

        let mut control = self.lock();
        let slot = control
            .active
            .as_mut()
            .filter(|active| active.aggregator.request_id() == request)
            .and_then(|active| active.slots.get_mut(index))
            .filter(|slot| slot.invocation == invocation);
        if let Some(slot) = slot {
            slot.retry = Some(handle);
        }
    }

    fn fire_retry(self: &Arc<Self>, request: RequestId, index: usize, invocation: u64) {
        let (module, _fired) = {
            let mut control = self.lock();
            let Some(slot) = control
                .active
                .as_mut()
                .filter(|active| active.aggregator.request_id() == request)
                .and_then(|active| active.slots.get_mut(index))
                .filter(|slot| slot.invocation == invocation)
            else {
                return;
            };
            (Arc::clone(&slot.module), slot.retry.take())
        };
        self.launch(request, index, invocation, module);
    }

    fn on_deadline(&self, request: RequestId) {
        let teardown = {
            let mut control = self.lock();
            let owns = control
                .active
                .as_ref()
                .is_some_and(|active| active.aggregator.request_id() == request);
            if !owns || !control.state.is_in_flight() {
                log::debug!("[{}] Deadline fired after completion; ignoring", request);
                return;
            }
            log::warn!("[{}] Deadline reached", request);
            self.finish(
                &mut control,
                Verdict::Canceled(CancelReason::Timeout),
                OrchestratorState::TimedOut,
            )
        };

        if let Some(teardown) = teardown {
            self.teardown(teardown);
        }
    }
}
