//! Test doubles for the orchestration core

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::module::{AuthenticatorModule, ProbeReport, ResultSink};
use super::presenter::Presenter;
use super::timer::{Clock, Timer, TimerHandle, TimerTask};
use super::types::{AttemptResult, ModuleId, RequestId, Verdict};

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

struct Scheduled {
    id: u64,
    due_ms: u64,
    task: TimerTask,
    canceled: Arc<AtomicBool>,
}

/// Timer whose tasks fire only from `advance`
#[derive(Clone)]
pub struct ManualTimer {
    clock: ManualClock,
    tasks: Arc<Mutex<Vec<Scheduled>>>,
    next_id: Arc<AtomicU64>,
}

impl ManualTimer {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            tasks: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Tasks still waiting to fire
    pub fn armed(&self) -> usize {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| !t.canceled.load(Ordering::SeqCst))
            .count()
    }

    /// Move time forward, firing due tasks in deadline order
    pub fn advance(&self, ms: u64) {
        let target = self.clock.now_ms() + ms;

        loop {
            let next = {
                let mut tasks = self.tasks.lock().unwrap();
                tasks.retain(|t| !t.canceled.load(Ordering::SeqCst));
                let position = tasks
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due_ms <= target)
                    .min_by_key(|(_, t)| (t.due_ms, t.id))
                    .map(|(i, _)| i);
                position.map(|i| tasks.remove(i))
            };

            match next {
                Some(scheduled) => {
                    if scheduled.due_ms > self.clock.now_ms() {
                        self.clock.set(scheduled.due_ms);
                    }
                    (scheduled.task)();
                }
                None => break,
            }
        }

        self.clock.set(target);
    }
}

impl Timer for ManualTimer {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let canceled = Arc::new(AtomicBool::new(false));
        self.tasks.lock().unwrap().push(Scheduled {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            due_ms: self.clock.now_ms() + delay.as_millis() as u64,
            task,
            canceled: Arc::clone(&canceled),
        });
        TimerHandle::new(move || canceled.store(true, Ordering::SeqCst))
    }
}

/// Module driven entirely by the test
///
/// Every `authenticate()` call keeps its sink, so tests can report through
/// the latest invocation or through a superseded one.
pub struct ScriptedModule {
    id: ModuleId,
    probe: ProbeReport,
    panic_on_authenticate: bool,
    sinks: Mutex<Vec<ResultSink>>,
    cancels: AtomicUsize,
}

impl ScriptedModule {
    pub fn new(id: ModuleId) -> Arc<Self> {
        Self::build(id, ProbeReport::ready(), false)
    }

    pub fn with_probe(id: ModuleId, probe: ProbeReport) -> Arc<Self> {
        Self::build(id, probe, false)
    }

    pub fn panicking(id: ModuleId) -> Arc<Self> {
        Self::build(id, ProbeReport::ready(), true)
    }

    fn build(id: ModuleId, probe: ProbeReport, panic_on_authenticate: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            probe,
            panic_on_authenticate,
            sinks: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
        })
    }

    pub fn authenticate_calls(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// Sink handed over by the n-th `authenticate()` call (0-based)
    pub fn sink(&self, invocation: usize) -> ResultSink {
        self.sinks.lock().unwrap()[invocation].clone()
    }

    /// Report through the most recent invocation
    pub fn emit(&self, result: AttemptResult) {
        let sink = self
            .sinks
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("module was never asked to authenticate");
        sink.deliver(result);
    }
}

impl AuthenticatorModule for ScriptedModule {
    fn id(&self) -> ModuleId {
        self.id.clone()
    }

    fn probe(&self) -> ProbeReport {
        self.probe
    }

    fn authenticate(&self, sink: ResultSink) {
        if self.panic_on_authenticate {
            panic!("scripted module {} exploded", self.id);
        }
        self.sinks.lock().unwrap().push(sink);
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Opened(RequestId),
    Closed(RequestId),
    Help(ModuleId, String),
}

#[derive(Default)]
pub struct RecordingPresenter {
    events: Mutex<Vec<UiEvent>>,
}

impl RecordingPresenter {
    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Presenter for RecordingPresenter {
    fn on_ui_opened(&self, request: RequestId) {
        self.events.lock().unwrap().push(UiEvent::Opened(request));
    }

    fn on_ui_closed(&self, request: RequestId) {
        self.events.lock().unwrap().push(UiEvent::Closed(request));
    }

    fn on_help(&self, module: &ModuleId, text: &str) {
        self.events
            .lock()
            .unwrap()
            .push(UiEvent::Help(module.clone(), text.to_string()));
    }
}

/// Collects delivered verdicts with the clock time of delivery
#[derive(Clone)]
pub struct VerdictRecorder {
    clock: ManualClock,
    delivered: Arc<Mutex<Vec<(u64, Verdict)>>>,
}

impl VerdictRecorder {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            delivered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn callback(&self) -> impl FnOnce(Verdict) + Send + 'static {
        let clock = self.clock.clone();
        let delivered = Arc::clone(&self.delivered);
        move |verdict| delivered.lock().unwrap().push((clock.now_ms(), verdict))
    }

    pub fn delivered(&self) -> Vec<(u64, Verdict)> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn verdicts(&self) -> Vec<Verdict> {
        self.delivered().into_iter().map(|(_, v)| v).collect()
    }
}
