//! Clock and timer seams
//!
//! The orchestrator never sleeps. Deadlines and retry cooldowns are handed to
//! a [`Timer`], and wall-clock reads go through a [`Clock`], so tests can
//! drive every timing scenario deterministically.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::fmt;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of wall-clock time in milliseconds since UNIX epoch
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Production clock backed by `SystemTime`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Work to run when a timer fires
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Schedules one-shot tasks
pub trait Timer: Send + Sync {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;
}

/// Handle to a scheduled task; dropping it cancels the task
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl TimerHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to cancel
    pub fn inert() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// Signal type for stopping a timer thread
#[derive(Debug, Clone, Copy)]
struct StopTimer;

/// Timer that parks one std thread per task on a crossbeam channel
///
/// The thread waits with `recv_timeout`; a stop message or a dropped handle
/// (channel disconnect) ends it without running the task.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadTimer;

impl Timer for ThreadTimer {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let (stop_tx, stop_rx) = bounded::<StopTimer>(1);

        let spawned = thread::Builder::new()
            .name("biogate-timer".to_string())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(delay) {
                    task();
                }
            });

        match spawned {
            Ok(_) => TimerHandle::new(move || stop(stop_tx)),
            Err(e) => {
                log::error!("Failed to spawn timer thread: {}", e);
                TimerHandle::inert()
            }
        }
    }
}

fn stop(stop_tx: Sender<StopTimer>) {
    // Best effort: the thread may already have fired
    let _ = stop_tx.try_send(StopTimer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_thread_timer_fires() {
        let (tx, rx) = bounded::<()>(1);
        let _handle = ThreadTimer.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_dropped_handle_cancels() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let handle = ThreadTimer.schedule(
            Duration::from_millis(50),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );
        handle.cancel();
        thread::sleep(Duration::from_millis(150));
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
