//! Shared data model for authentication attempts
//!
//! Everything a module reports, and everything the caller receives, is plain
//! data: results are tagged values consumed through one serialized entry
//! point rather than listener objects with mutable fields.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::validation::{validate_vendor_name, ValidationError};

/// Identifier of a sensor class
///
/// Compared by value. The textual form (`fingerprint`, `face`, `iris`,
/// `vendor:<name>`) is used in configuration and as the persistence key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ModuleId {
    Fingerprint,
    Face,
    Iris,
    Vendor(String),
}

impl ModuleId {
    /// Build a vendor module id, validating the vendor name
    pub fn vendor(name: &str) -> Result<Self, ValidationError> {
        Ok(ModuleId::Vendor(validate_vendor_name(name)?))
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleId::Fingerprint => f.write_str("fingerprint"),
            ModuleId::Face => f.write_str("face"),
            ModuleId::Iris => f.write_str("iris"),
            ModuleId::Vendor(name) => write!(f, "vendor:{}", name),
        }
    }
}

impl FromStr for ModuleId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fingerprint" => Ok(ModuleId::Fingerprint),
            "face" => Ok(ModuleId::Face),
            "iris" => Ok(ModuleId::Iris),
            other => match other.strip_prefix("vendor:") {
                Some(name) => ModuleId::vendor(name),
                None => Err(ValidationError::InvalidFormat(format!(
                    "Unknown module id '{}' (expected fingerprint, face, iris or vendor:<name>)",
                    other
                ))),
            },
        }
    }
}

impl From<ModuleId> for String {
    fn from(id: ModuleId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ModuleId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Identifier of one `start()` call
///
/// Unique for the lifetime of the process; events carrying any other id are
/// stale and never touch the active attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestId(u64);

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

impl RequestId {
    pub(crate) fn next() -> Self {
        RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Opaque payload returned by a module on success
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken(Vec<u8>);

impl AuthToken {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        AuthToken(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

// Token bytes stay out of logs
impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken({} bytes)", self.0.len())
    }
}

/// Why a module attempt did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The sensor gave up waiting for the user
    Timeout,
    /// Hardware glitch during capture
    SensorFailed,
    /// Wrong finger/face; the sensor itself worked
    AuthenticationFailed,
    LockedOut,
    LockedOutPermanent,
    Canceled,
    UserCanceled,
    NoHardware,
    HardwareUnavailable,
    NoBiometricsRegistered,
    Unknown,
}

impl FailureReason {
    /// Lockout-class failures write to the lockout tracker
    pub fn is_lockout(&self) -> bool {
        matches!(self, FailureReason::LockedOut | FailureReason::LockedOutPermanent)
    }

    /// Configuration problems: retrying cannot change the outcome
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FailureReason::NoHardware
                | FailureReason::HardwareUnavailable
                | FailureReason::NoBiometricsRegistered
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::Timeout => "timeout",
            FailureReason::SensorFailed => "sensor_failed",
            FailureReason::AuthenticationFailed => "authentication_failed",
            FailureReason::LockedOut => "locked_out",
            FailureReason::LockedOutPermanent => "locked_out_permanent",
            FailureReason::Canceled => "canceled",
            FailureReason::UserCanceled => "user_canceled",
            FailureReason::NoHardware => "no_hardware",
            FailureReason::HardwareUnavailable => "hardware_unavailable",
            FailureReason::NoBiometricsRegistered => "no_biometrics_registered",
            FailureReason::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Who stopped a module attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOrigin {
    /// The orchestrator called `cancel()` on the module
    Orchestrator,
    /// The user backed out through the module's own UI path
    User,
}

/// One event reported by a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    Success(AuthToken),
    Failure(FailureReason),
    Canceled(CancelOrigin),
    /// Non-terminal guidance ("move finger slightly"); never stored
    Help(String),
}

impl AttemptResult {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptResult::Help(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptResult::Success(_))
    }

    /// Fold cancel-class failure codes into the matching `Canceled` origin
    ///
    /// Backends report the same back-out either way; only the `Canceled`
    /// form reaches aggregation.
    pub fn normalized(self) -> Self {
        match self {
            AttemptResult::Failure(FailureReason::UserCanceled) => {
                AttemptResult::Canceled(CancelOrigin::User)
            }
            AttemptResult::Failure(FailureReason::Canceled) => {
                AttemptResult::Canceled(CancelOrigin::Orchestrator)
            }
            other => other,
        }
    }
}

/// How module results combine into one verdict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationPolicy {
    /// First success wins
    #[default]
    Any,
    /// Every module must succeed; one veto is fatal
    All,
}

impl FromStr for ConfirmationPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "any" => Ok(ConfirmationPolicy::Any),
            "all" => Ok(ConfirmationPolicy::All),
            other => Err(ValidationError::InvalidFormat(format!(
                "Unknown confirmation policy '{}' (expected any or all)",
                other
            ))),
        }
    }
}

impl fmt::Display for ConfirmationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationPolicy::Any => f.write_str("any"),
            ConfirmationPolicy::All => f.write_str("all"),
        }
    }
}

/// Why a whole request ended as canceled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The user backed out
    User,
    /// The per-request deadline fired
    Timeout,
    /// The caller canceled through the API
    Caller,
    /// Every unresolved module was stopped by the orchestrator itself
    Superseded,
    /// The orchestrator was dropped with a request in flight
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CancelReason::User => "user",
            CancelReason::Timeout => "timeout",
            CancelReason::Caller => "caller",
            CancelReason::Superseded => "superseded",
            CancelReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSuccess {
    pub module: ModuleId,
    pub token: AuthToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleFailure {
    pub module: ModuleId,
    pub reason: FailureReason,
}

/// The single outcome delivered to the caller of `start()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum Verdict {
    Succeeded(Vec<ModuleSuccess>),
    Failed(Vec<ModuleFailure>),
    Canceled(CancelReason),
}

impl Verdict {
    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Succeeded(_))
    }

    /// Machine-readable reason set of a failed verdict
    pub fn failure_reasons(&self) -> BTreeSet<FailureReason> {
        match self {
            Verdict::Failed(failures) => failures.iter().map(|f| f.reason).collect(),
            _ => BTreeSet::new(),
        }
    }
}
