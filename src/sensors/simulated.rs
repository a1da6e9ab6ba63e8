//! Scripted sensor for development without hardware
//!
//! Every `authenticate()` spawns a worker thread that replays the next steps
//! of the script. `cancel()` stops the worker through a crossbeam channel;
//! the worker then reports `Canceled(Orchestrator)` on its own sink, which
//! the orchestrator drops once the attempt is over.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{ScriptOutcome, ScriptStep, SensorConfig};
use crate::auth::{
    AttemptResult, AuthToken, AuthenticatorModule, CancelOrigin, FailureReason, ModuleId,
    ProbeReport, ResultSink,
};

/// Signal to stop a sensor worker
#[derive(Debug, Clone, Copy)]
struct StopSensor;

struct SensorWorker {
    stop_tx: Sender<StopSensor>,
    _thread_handle: JoinHandle<()>,
}

pub struct SimulatedModule {
    config: SensorConfig,
    script: Arc<Mutex<VecDeque<ScriptStep>>>,
    worker: Mutex<Option<SensorWorker>>,
    invocations: AtomicU64,
}

impl SimulatedModule {
    pub fn new(config: SensorConfig) -> Self {
        let script = config.script.iter().cloned().collect();
        Self {
            config,
            script: Arc::new(Mutex::new(script)),
            worker: Mutex::new(None),
            invocations: AtomicU64::new(0),
        }
    }

    /// Steps not yet replayed
    pub fn remaining_steps(&self) -> usize {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn worker(&self) -> MutexGuard<'_, Option<SensorWorker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_worker(&self) {
        if let Some(worker) = self.worker().take() {
            // Best effort; a worker that already finished has no receiver
            let _ = worker.stop_tx.try_send(StopSensor);
        }
    }
}

impl AuthenticatorModule for SimulatedModule {
    fn id(&self) -> ModuleId {
        self.config.id.clone()
    }

    fn probe(&self) -> ProbeReport {
        ProbeReport {
            hardware_present: self.config.present,
            has_enrollment: self.config.enrolled,
        }
    }

    fn authenticate(&self, sink: ResultSink) {
        // A new invocation supersedes whatever is still running
        self.stop_worker();

        let invocation = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        let (stop_tx, stop_rx) = bounded::<StopSensor>(1);
        let id = self.config.id.clone();
        let script = Arc::clone(&self.script);
        let fallback = sink.clone();

        // std::thread, not tokio: the sink may call back into the orchestrator
        let spawned = std::thread::Builder::new()
            .name(format!("sensor-{}", id))
            .spawn(move || run_sensor_worker(id, invocation, script, sink, stop_rx));

        match spawned {
            Ok(handle) => {
                *self.worker() = Some(SensorWorker {
                    stop_tx,
                    _thread_handle: handle,
                });
            }
            Err(e) => {
                log::error!("Failed to start sensor worker for {}: {}", self.config.id, e);
                fallback.failure(FailureReason::HardwareUnavailable);
            }
        }
    }

    fn cancel(&self) {
        log::debug!("[SIM] Cancel requested for {}", self.config.id);
        self.stop_worker();
    }
}

fn run_sensor_worker(
    id: ModuleId,
    invocation: u64,
    script: Arc<Mutex<VecDeque<ScriptStep>>>,
    sink: ResultSink,
    stop_rx: Receiver<StopSensor>,
) {
    log::debug!("[SIM] {} invocation {} started", id, invocation);

    loop {
        let step = script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        let Some(step) = step else {
            log::debug!("[SIM] {} script exhausted; waiting for cancel", id);
            // Either a stop signal or the module going away
            let _ = stop_rx.recv();
            sink.canceled(CancelOrigin::Orchestrator);
            return;
        };

        match stop_rx.recv_timeout(Duration::from_millis(step.after_ms)) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(StopSensor) | Err(RecvTimeoutError::Disconnected) => {
                log::debug!("[SIM] {} invocation {} stopped", id, invocation);
                sink.canceled(CancelOrigin::Orchestrator);
                return;
            }
        }

        let terminal = step.outcome.is_terminal();
        let result = match step.outcome {
            ScriptOutcome::Success => AttemptResult::Success(AuthToken::new(
                format!("sim:{}:{}", id, invocation).into_bytes(),
            )),
            ScriptOutcome::Failure(reason) => AttemptResult::Failure(reason),
            ScriptOutcome::Help(text) => AttemptResult::Help(text),
            ScriptOutcome::UserCancel => AttemptResult::Canceled(CancelOrigin::User),
        };

        log::info!("[SIM] {} reports {:?}", id, result);
        sink.deliver(result);

        if terminal {
            return;
        }
    }
}
