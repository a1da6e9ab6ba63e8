//! Authenticator module capability
//!
//! One trait per backend kind; concrete sensors, vendor engines and the
//! simulated development backend all implement [`AuthenticatorModule`].
//! Results travel back through a [`ResultSink`] that the orchestrator binds
//! to one request and one invocation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::types::{AttemptResult, AuthToken, CancelOrigin, FailureReason, ModuleId};

/// Result of probing a module before an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub hardware_present: bool,
    pub has_enrollment: bool,
}

impl ProbeReport {
    pub fn ready() -> Self {
        Self {
            hardware_present: true,
            has_enrollment: true,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            hardware_present: false,
            has_enrollment: false,
        }
    }

    /// Configuration failure implied by this report, if any
    pub fn failure(&self) -> Option<FailureReason> {
        if !self.hardware_present {
            Some(FailureReason::NoHardware)
        } else if !self.has_enrollment {
            Some(FailureReason::NoBiometricsRegistered)
        } else {
            None
        }
    }
}

/// Where a module reports its events
///
/// Cheap to clone and callable from any thread. A sink stays valid after the
/// attempt ends but its events are then ignored, so modules need not track
/// attempt lifetime themselves.
#[derive(Clone)]
pub struct ResultSink {
    deliver: Arc<dyn Fn(AttemptResult) + Send + Sync>,
}

impl ResultSink {
    pub fn new(deliver: impl Fn(AttemptResult) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn deliver(&self, result: AttemptResult) {
        (self.deliver)(result)
    }

    pub fn success(&self, token: AuthToken) {
        self.deliver(AttemptResult::Success(token))
    }

    pub fn failure(&self, reason: FailureReason) {
        self.deliver(AttemptResult::Failure(reason))
    }

    pub fn canceled(&self, origin: CancelOrigin) {
        self.deliver(AttemptResult::Canceled(origin))
    }

    pub fn help(&self, text: impl Into<String>) {
        self.deliver(AttemptResult::Help(text.into()))
    }
}

impl fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResultSink")
    }
}

/// One pluggable authentication backend
///
/// `authenticate` must not block: it starts the attempt and returns. The
/// module then delivers at most one terminal event per invocation (any number
/// of `Help` events may precede it). `cancel` may arrive at any time,
/// including after the terminal event, and must be a no-op in that case.
pub trait AuthenticatorModule: Send + Sync {
    fn id(&self) -> ModuleId;

    fn probe(&self) -> ProbeReport;

    fn authenticate(&self, sink: ResultSink);

    fn cancel(&self);
}

/// Probe a module, treating a panic as missing hardware
pub(crate) fn guarded_probe(module: &dyn AuthenticatorModule) -> ProbeReport {
    match catch_unwind(AssertUnwindSafe(|| module.probe())) {
        Ok(report) => report,
        Err(_) => {
            log::error!("Module {} panicked during probe", module.id());
            ProbeReport::unavailable()
        }
    }
}

/// Start a module attempt; a panic becomes `Failure(Unknown)` on the sink
pub(crate) fn guarded_authenticate(module: &dyn AuthenticatorModule, sink: ResultSink) {
    let fallback = sink.clone();
    if catch_unwind(AssertUnwindSafe(|| module.authenticate(sink))).is_err() {
        log::error!("Module {} panicked during authenticate", module.id());
        fallback.failure(FailureReason::Unknown);
    }
}

pub(crate) fn guarded_cancel(module: &dyn AuthenticatorModule) {
    if catch_unwind(AssertUnwindSafe(|| module.cancel())).is_err() {
        log::error!("Module {} panicked during cancel", module.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Exploding;

    impl AuthenticatorModule for Exploding {
        fn id(&self) -> ModuleId {
            ModuleId::Iris
        }

        fn probe(&self) -> ProbeReport {
            panic!("probe exploded");
        }

        fn authenticate(&self, _sink: ResultSink) {
            panic!("authenticate exploded");
        }

        fn cancel(&self) {
            panic!("cancel exploded");
        }
    }

    #[test]
    fn test_probe_failure_mapping() {
        assert_eq!(ProbeReport::ready().failure(), None);
        assert_eq!(
            ProbeReport::unavailable().failure(),
            Some(FailureReason::NoHardware)
        );
        let not_enrolled = ProbeReport {
            hardware_present: true,
            has_enrollment: false,
        };
        assert_eq!(
            not_enrolled.failure(),
            Some(FailureReason::NoBiometricsRegistered)
        );
    }

    #[test]
    fn test_panics_are_contained() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_sink = Arc::clone(&seen);
        let sink = ResultSink::new(move |r| seen_in_sink.lock().unwrap().push(r));

        assert_eq!(guarded_probe(&Exploding), ProbeReport::unavailable());
        guarded_authenticate(&Exploding, sink);
        guarded_cancel(&Exploding);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![AttemptResult::Failure(FailureReason::Unknown)]
        );
    }
}
