//! Process-wide lockout tracking
//!
//! One record per module: a "do not attempt before" timestamp or a permanent
//! flag. Temporary records expire lazily on read; permanent ones are cleared
//! only by the device-unlock signal. Every mutation is written through a
//! [`LockoutStore`] so records survive a process restart.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::timer::Clock;
use super::types::ModuleId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutRecord {
    /// Epoch milliseconds; `None` for permanent records
    pub locked_until_ms: Option<u64>,
    #[serde(default)]
    pub permanent: bool,
}

impl LockoutRecord {
    fn is_active(&self, now_ms: u64) -> bool {
        self.permanent || self.locked_until_ms.is_some_and(|until| now_ms < until)
    }
}

/// Everything persisted for one unlock epoch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutSnapshot {
    /// Advanced by every device-unlock reset
    pub epoch: u64,
    #[serde(default)]
    pub records: BTreeMap<ModuleId, LockoutRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Current lockout state of one module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockoutStatus {
    Unlocked,
    Temporary { remaining_ms: u64 },
    Permanent,
}

/// Durable key-value backing for the tracker
pub trait LockoutStore: Send + Sync {
    fn load(&self) -> Result<LockoutSnapshot>;
    fn save(&self, snapshot: &LockoutSnapshot) -> Result<()>;
}

/// JSON file store in the data directory
#[derive(Debug, Clone)]
pub struct FileLockoutStore {
    path: PathBuf,
}

impl FileLockoutStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LockoutStore for FileLockoutStore {
    fn load(&self) -> Result<LockoutSnapshot> {
        if !self.path.exists() {
            return Ok(LockoutSnapshot::default());
        }

        let json = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read lockout state: {}", self.path.display()))?;
        let snapshot: LockoutSnapshot =
            serde_json::from_str(&json).context("Failed to parse lockout state")?;

        log::debug!(
            "Lockout state loaded: epoch={}, {} records",
            snapshot.epoch,
            snapshot.records.len()
        );
        Ok(snapshot)
    }

    fn save(&self, snapshot: &LockoutSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create lockout state directory")?;
        }

        let json =
            serde_json::to_string_pretty(snapshot).context("Failed to serialize lockout state")?;

        // Write-then-rename so a crash never leaves a torn file
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json).context("Failed to write lockout state")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))
                .context("Failed to set lockout state permissions")?;
        }

        fs::rename(&tmp_path, &self.path).context("Failed to replace lockout state")?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryLockoutStore {
    snapshot: Mutex<LockoutSnapshot>,
}

impl LockoutStore for MemoryLockoutStore {
    fn load(&self) -> Result<LockoutSnapshot> {
        Ok(self
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, snapshot: &LockoutSnapshot) -> Result<()> {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    snapshot: LockoutSnapshot,
    /// Bumped by every mutation
    revision: u64,
}

/// A snapshot taken under the state lock, written after releasing it
struct PendingSave {
    revision: u64,
    snapshot: LockoutSnapshot,
}

/// Shared lockout state; hand it to every orchestrator through an `Arc`
pub struct LockoutTracker {
    state: Mutex<TrackerState>,
    store: Box<dyn LockoutStore>,
    /// Revision of the newest snapshot handed to the store
    saved_revision: Mutex<u64>,
    clock: Arc<dyn Clock>,
}

impl LockoutTracker {
    /// Load persisted state; an unreadable store starts empty rather than
    /// blocking authentication
    pub fn new(store: Box<dyn LockoutStore>, clock: Arc<dyn Clock>) -> Self {
        let snapshot = match store.load() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("Lockout state unavailable, starting clean: {:#}", e);
                LockoutSnapshot::default()
            }
        };

        Self {
            state: Mutex::new(TrackerState {
                snapshot,
                revision: 0,
            }),
            store,
            saved_revision: Mutex::new(0),
            clock,
        }
    }

    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(Box::new(MemoryLockoutStore::default()), clock)
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a mutation; call with the state lock held
    fn stage(state: &mut TrackerState) -> PendingSave {
        state.revision += 1;
        state.snapshot.updated_at = Some(chrono::Utc::now().to_rfc3339());
        PendingSave {
            revision: state.revision,
            snapshot: state.snapshot.clone(),
        }
    }

    /// Write a staged snapshot; call after releasing the state lock
    ///
    /// A snapshot older than one already written is skipped.
    fn persist(&self, pending: PendingSave) {
        let mut saved = self
            .saved_revision
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if pending.revision <= *saved {
            return;
        }
        match self.store.save(&pending.snapshot) {
            Ok(()) => *saved = pending.revision,
            Err(e) => log::error!("Failed to persist lockout state: {:#}", e),
        }
    }

    /// Lock `module` until `now + duration`; never shortens an existing lockout
    pub fn mark_locked_out(&self, module: &ModuleId, duration: Duration) {
        let until = self.clock.now_ms().saturating_add(duration.as_millis() as u64);
        let pending = {
            let mut state = self.lock();
            let record = state.snapshot.records.entry(module.clone()).or_default();
            if record.permanent {
                return;
            }
            record.locked_until_ms = Some(record.locked_until_ms.map_or(until, |t| t.max(until)));
            Self::stage(&mut state)
        };

        log::warn!("{} locked out for {}ms", module, duration.as_millis());
        self.persist(pending);
    }

    /// Lock `module` until the next device unlock
    pub fn mark_locked_out_permanent(&self, module: &ModuleId) {
        let pending = {
            let mut state = self.lock();
            state.snapshot.records.insert(
                module.clone(),
                LockoutRecord {
                    locked_until_ms: None,
                    permanent: true,
                },
            );
            Self::stage(&mut state)
        };

        log::warn!("{} permanently locked out until device unlock", module);
        self.persist(pending);
    }

    pub fn is_locked_out(&self, module: &ModuleId) -> bool {
        !matches!(self.status(module), LockoutStatus::Unlocked)
    }

    /// Current status; clears an expired temporary record as a side effect
    pub fn status(&self, module: &ModuleId) -> LockoutStatus {
        let now = self.clock.now_ms();
        let pending = {
            let mut state = self.lock();

            let record = match state.snapshot.records.get(module) {
                Some(record) => *record,
                None => return LockoutStatus::Unlocked,
            };

            if record.permanent {
                return LockoutStatus::Permanent;
            }

            if record.is_active(now) {
                let until = record.locked_until_ms.unwrap_or(now);
                return LockoutStatus::Temporary {
                    remaining_ms: until - now,
                };
            }

            state.snapshot.records.remove(module);
            Self::stage(&mut state)
        };

        log::debug!("Lockout expired for {}", module);
        self.persist(pending);
        LockoutStatus::Unlocked
    }

    /// Time left on a temporary lockout
    pub fn remaining(&self, module: &ModuleId) -> Option<Duration> {
        match self.status(module) {
            LockoutStatus::Temporary { remaining_ms } => Some(Duration::from_millis(remaining_ms)),
            _ => None,
        }
    }

    /// Clear every record and start a new unlock epoch
    pub fn reset_all(&self) {
        let (cleared, pending) = {
            let mut state = self.lock();
            let cleared = state.snapshot.records.len();
            state.snapshot.records.clear();
            state.snapshot.epoch += 1;
            (cleared, Self::stage(&mut state))
        };

        log::info!(
            "✓ Lockouts reset ({} cleared), unlock epoch {}",
            cleared,
            pending.snapshot.epoch
        );
        self.persist(pending);
    }

    pub fn epoch(&self) -> u64 {
        self.lock().snapshot.epoch
    }

    pub fn snapshot(&self) -> LockoutSnapshot {
        self.lock().snapshot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::ManualClock;
    use std::sync::{OnceLock, Weak};
    use tempfile::tempdir;

    fn tracker(clock: &ManualClock) -> LockoutTracker {
        LockoutTracker::in_memory(Arc::new(clock.clone()))
    }

    #[test]
    fn test_temporary_lockout_expires() {
        let clock = ManualClock::new(1_000);
        let tracker = tracker(&clock);

        tracker.mark_locked_out(&ModuleId::Fingerprint, Duration::from_millis(500));
        assert!(tracker.is_locked_out(&ModuleId::Fingerprint));
        assert!(!tracker.is_locked_out(&ModuleId::Face));
        assert_eq!(
            tracker.remaining(&ModuleId::Fingerprint),
            Some(Duration::from_millis(500))
        );

        clock.advance(500);
        assert!(!tracker.is_locked_out(&ModuleId::Fingerprint));
        assert!(tracker.snapshot().records.is_empty());
    }

    #[test]
    fn test_lockout_is_never_shortened() {
        let clock = ManualClock::new(0);
        let tracker = tracker(&clock);

        tracker.mark_locked_out(&ModuleId::Face, Duration::from_millis(1_000));
        tracker.mark_locked_out(&ModuleId::Face, Duration::from_millis(10));
        assert_eq!(
            tracker.status(&ModuleId::Face),
            LockoutStatus::Temporary { remaining_ms: 1_000 }
        );
    }

    #[test]
    fn test_permanent_survives_time_but_not_unlock() {
        let clock = ManualClock::new(0);
        let tracker = tracker(&clock);

        tracker.mark_locked_out_permanent(&ModuleId::Iris);
        tracker.mark_locked_out(&ModuleId::Iris, Duration::from_millis(1_000));
        clock.advance(10_000_000);
        assert_eq!(tracker.status(&ModuleId::Iris), LockoutStatus::Permanent);

        tracker.reset_all();
        assert!(!tracker.is_locked_out(&ModuleId::Iris));
        assert_eq!(tracker.epoch(), 1);
    }

    #[test]
    fn test_file_store_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lockout.json");
        let clock = ManualClock::new(5_000);

        {
            let tracker = LockoutTracker::new(
                Box::new(FileLockoutStore::new(path.clone())),
                Arc::new(clock.clone()),
            );
            tracker.mark_locked_out(&ModuleId::Fingerprint, Duration::from_millis(60_000));
            tracker.mark_locked_out_permanent(&ModuleId::Vendor("acme".to_string()));
        }

        let reloaded = LockoutTracker::new(
            Box::new(FileLockoutStore::new(path.clone())),
            Arc::new(clock.clone()),
        );
        assert!(reloaded.is_locked_out(&ModuleId::Fingerprint));
        assert_eq!(
            reloaded.status(&ModuleId::Vendor("acme".to_string())),
            LockoutStatus::Permanent
        );

        reloaded.reset_all();
        let after_unlock =
            LockoutTracker::new(Box::new(FileLockoutStore::new(path)), Arc::new(clock));
        assert!(after_unlock.snapshot().records.is_empty());
        assert_eq!(after_unlock.epoch(), 1);
    }

    #[test]
    fn test_corrupt_file_starts_clean() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lockout.json");
        fs::write(&path, "{ not json").unwrap();

        let tracker = LockoutTracker::new(
            Box::new(FileLockoutStore::new(path)),
            Arc::new(ManualClock::new(0)),
        );
        assert!(!tracker.is_locked_out(&ModuleId::Face));
    }

    /// Records whether the tracker's state lock was free at each save
    struct ObservingStore {
        tracker: Arc<OnceLock<Weak<LockoutTracker>>>,
        lock_free: Arc<Mutex<Vec<bool>>>,
    }

    impl LockoutStore for ObservingStore {
        fn load(&self) -> Result<LockoutSnapshot> {
            Ok(LockoutSnapshot::default())
        }

        fn save(&self, _snapshot: &LockoutSnapshot) -> Result<()> {
            if let Some(tracker) = self.tracker.get().and_then(Weak::upgrade) {
                let free = tracker.state.try_lock().is_ok();
                self.lock_free.lock().unwrap().push(free);
            }
            Ok(())
        }
    }

    #[test]
    fn test_store_is_written_outside_state_lock() {
        let handle = Arc::new(OnceLock::new());
        let lock_free = Arc::new(Mutex::new(Vec::new()));
        let clock = ManualClock::new(0);
        let tracker = Arc::new(LockoutTracker::new(
            Box::new(ObservingStore {
                tracker: Arc::clone(&handle),
                lock_free: Arc::clone(&lock_free),
            }),
            Arc::new(clock.clone()),
        ));
        assert!(handle.set(Arc::downgrade(&tracker)).is_ok());

        tracker.mark_locked_out(&ModuleId::Face, Duration::from_millis(10));
        tracker.mark_locked_out_permanent(&ModuleId::Iris);
        clock.advance(10);
        assert!(!tracker.is_locked_out(&ModuleId::Face));
        tracker.reset_all();

        assert_eq!(*lock_free.lock().unwrap(), vec![true; 4]);
    }

    #[test]
    fn test_older_snapshot_never_overwrites_newer() {
        let store = Arc::new(MemoryLockoutStore::default());
        let tracker = LockoutTracker::new(
            Box::new(SharedStore(Arc::clone(&store))),
            Arc::new(ManualClock::new(0)),
        );

        let older = {
            let mut state = tracker.lock();
            state.snapshot.epoch = 7;
            LockoutTracker::stage(&mut state)
        };
        tracker.reset_all();
        tracker.persist(older);

        assert_eq!(store.load().unwrap().epoch, 8);
    }

    struct SharedStore(Arc<MemoryLockoutStore>);

    impl LockoutStore for SharedStore {
        fn load(&self) -> Result<LockoutSnapshot> {
            self.0.load()
        }

        fn save(&self, snapshot: &LockoutSnapshot) -> Result<()> {
            self.0.save(snapshot)
        }
    }

    #[test]
    fn test_shared_across_threads() {
        let clock = ManualClock::new(0);
        let tracker = Arc::new(tracker(&clock));

        let handles: Vec<_> = [ModuleId::Face, ModuleId::Iris, ModuleId::Fingerprint]
            .into_iter()
            .map(|id| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    tracker.mark_locked_out(&id, Duration::from_millis(100));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.snapshot().records.len(), 3);
    }
}
