//! Authentication runtime wiring and lifecycle control
//!
//! `AuthRuntime` builds the lockout tracker, the module registry and the
//! orchestrator from configuration, and runs the `UnlockListener` worker that
//! resets lockouts when the device is unlocked.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::auth::{
    FileLockoutStore, LockoutTracker, LogPresenter, MemoryLockoutStore, Orchestrator, Presenter,
    SystemClock,
};
use crate::config::AppConfig;
use crate::paths::AppPaths;
use crate::sensors::build_registry;

/// Signal type for stopping a runtime worker
#[derive(Debug, Clone, Copy)]
pub struct StopSignal;

/// Device-level events that clear every lockout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockEvent {
    /// The device was unlocked by any means
    DeviceUnlocked,
    /// The user passed the device-credential fallback (PIN, password)
    CredentialVerified,
}

/// Worker thread that applies unlock events to the lockout tracker
pub struct UnlockListener {
    stop_tx: Sender<StopSignal>,
    thread_handle: Option<JoinHandle<()>>,
}

impl UnlockListener {
    pub fn start(tracker: Arc<LockoutTracker>, events: Receiver<UnlockEvent>) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<StopSignal>(1);

        let handle = std::thread::Builder::new()
            .name("unlock-listener".to_string())
            .spawn(move || run_unlock_listener(tracker, events, stop_rx))
            .context("Failed to spawn unlock listener")?;

        log::debug!("Unlock listener started");
        Ok(Self {
            stop_tx,
            thread_handle: Some(handle),
        })
    }

    /// Stop the listener after it has applied every queued event
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(StopSignal);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("Unlock listener panicked");
            }
        }
        log::debug!("Unlock listener stopped");
    }
}

fn run_unlock_listener(
    tracker: Arc<LockoutTracker>,
    events: Receiver<UnlockEvent>,
    stop_rx: Receiver<StopSignal>,
) {
    loop {
        select! {
            recv(events) -> event => match event {
                Ok(event) => apply_unlock(&tracker, event),
                // Every sender is gone; nothing more can arrive
                Err(_) => return,
            },
            recv(stop_rx) -> _ => {
                for event in events.try_iter() {
                    apply_unlock(&tracker, event);
                }
                return;
            }
        }
    }
}

fn apply_unlock(tracker: &LockoutTracker, event: UnlockEvent) {
    log::info!("Unlock event: {:?}", event);
    tracker.reset_all();
}

/// Open the lockout tracker described by the config
pub fn open_lockout_tracker(paths: &AppPaths, config: &AppConfig) -> Arc<LockoutTracker> {
    let clock = Arc::new(SystemClock);
    let tracker = if config.lockout.persist {
        LockoutTracker::new(Box::new(FileLockoutStore::new(paths.lockout_file())), clock)
    } else {
        LockoutTracker::new(Box::new(MemoryLockoutStore::default()), clock)
    };
    Arc::new(tracker)
}

/// Everything one process needs to run authentication requests
pub struct AuthRuntime {
    orchestrator: Orchestrator,
    lockout: Arc<LockoutTracker>,
    unlock_tx: Sender<UnlockEvent>,
    unlock_listener: Option<UnlockListener>,
}

impl AuthRuntime {
    pub fn start(paths: &AppPaths, config: &AppConfig) -> Result<Self> {
        Self::start_with_presenter(paths, config, Arc::new(LogPresenter))
    }

    pub fn start_with_presenter(
        paths: &AppPaths,
        config: &AppConfig,
        presenter: Arc<dyn Presenter>,
    ) -> Result<Self> {
        log::info!("Starting authentication runtime...");
        config.validate()?;

        let lockout = open_lockout_tracker(paths, config);
        let registry = build_registry(&config.sensors)?;

        let (unlock_tx, unlock_rx) = unbounded::<UnlockEvent>();
        let unlock_listener = UnlockListener::start(Arc::clone(&lockout), unlock_rx)?;

        let orchestrator = Orchestrator::builder(registry, Arc::clone(&lockout))
            .config(config.orchestrator.clone())
            .restart(config.restart.clone())
            .presenter(presenter)
            .build();

        log::info!(
            "✓ Authentication runtime started (unlock epoch {})",
            lockout.epoch()
        );
        Ok(Self {
            orchestrator,
            lockout,
            unlock_tx,
            unlock_listener: Some(unlock_listener),
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn lockout(&self) -> &Arc<LockoutTracker> {
        &self.lockout
    }

    /// Sender for the platform's device-unlock hook
    pub fn unlock_sender(&self) -> Sender<UnlockEvent> {
        self.unlock_tx.clone()
    }

    /// Stop the runtime gracefully
    pub fn stop(mut self) {
        log::info!("Stopping authentication runtime...");
        if let Some(listener) = self.unlock_listener.take() {
            listener.stop();
        }
        log::info!("✓ Authentication runtime stopped");
        // Dropping the orchestrator cancels anything still in flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ModuleId;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_unlock_event_resets_lockouts() {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::from_root(dir.path());
        let runtime = AuthRuntime::start(&paths, &AppConfig::default()).unwrap();

        runtime
            .lockout()
            .mark_locked_out(&ModuleId::Face, Duration::from_secs(60));
        runtime.lockout().mark_locked_out_permanent(&ModuleId::Fingerprint);
        let epoch = runtime.lockout().epoch();

        runtime
            .unlock_sender()
            .send(UnlockEvent::DeviceUnlocked)
            .unwrap();

        assert!(wait_for(|| runtime.lockout().epoch() == epoch + 1));
        assert!(!runtime.lockout().is_locked_out(&ModuleId::Face));
        assert!(!runtime.lockout().is_locked_out(&ModuleId::Fingerprint));
        runtime.stop();
    }

    #[test]
    fn test_stop_drains_queued_events() {
        let tracker = Arc::new(LockoutTracker::in_memory(Arc::new(SystemClock)));
        let (tx, rx) = unbounded();
        let listener = UnlockListener::start(Arc::clone(&tracker), rx).unwrap();

        tx.send(UnlockEvent::CredentialVerified).unwrap();
        tx.send(UnlockEvent::DeviceUnlocked).unwrap();
        listener.stop();

        assert_eq!(tracker.epoch(), 2);
    }

    #[test]
    fn test_persisted_lockout_survives_restart() {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::from_root(dir.path());
        let config = AppConfig::default();

        let first = AuthRuntime::start(&paths, &config).unwrap();
        first
            .lockout()
            .mark_locked_out(&ModuleId::Face, Duration::from_secs(600));
        first.stop();

        let second = AuthRuntime::start(&paths, &config).unwrap();
        assert!(second.lockout().is_locked_out(&ModuleId::Face));
        second.stop();
    }
}
