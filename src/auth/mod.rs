//! Multi-sensor authentication core
//!
//! A request runs every selected [`AuthenticatorModule`] in parallel and folds
//! their independent results into one [`Verdict`] under a
//! [`ConfirmationPolicy`]. The [`Orchestrator`] owns the lifecycle; the
//! [`ResultAggregator`] decides; the [`RestartPolicy`] handles per-module
//! recovery; the [`LockoutTracker`] remembers lockouts across requests.

pub mod aggregator;
pub mod error;
pub mod lockout;
pub mod module;
pub mod orchestrator;
pub mod presenter;
pub mod registry;
pub mod restart;
pub mod timer;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::{Decision, ResultAggregator};
pub use error::OrchestratorError;
pub use lockout::{
    FileLockoutStore, LockoutRecord, LockoutSnapshot, LockoutStatus, LockoutStore, LockoutTracker,
    MemoryLockoutStore,
};
pub use module::{AuthenticatorModule, ProbeReport, ResultSink};
pub use orchestrator::{
    Orchestrator, OrchestratorBuilder, OrchestratorConfig, OrchestratorState, PendingVerdict,
    VerdictCallback,
};
pub use presenter::{LogPresenter, Presenter};
pub use registry::ModuleRegistry;
pub use restart::{LockoutAction, ModuleHistory, RestartConfig, RestartDecision, RestartPolicy};
pub use timer::{Clock, SystemClock, ThreadTimer, Timer, TimerHandle, TimerTask};
pub use types::{
    AttemptResult, AuthToken, CancelOrigin, CancelReason, ConfirmationPolicy, FailureReason,
    ModuleFailure, ModuleId, ModuleSuccess, RequestId, Verdict,
};
