//! Per-module restart policy
//!
//! Maps one module's failure to a local action without looking at any other
//! module. The only state it sees is the module's attempt-local history,
//! which the orchestrator owns and updates.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::types::FailureReason;
use crate::validation::{
    validate_attempt_count, validate_lockout_duration_ms, validate_retry_delay_ms,
    ValidationError,
};

/// Restart tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    /// Cooldown before restarting a module that timed out (ms)
    pub short_anim_delay_ms: u64,
    /// How many times a timed-out module is restarted per request
    pub max_timeout_restarts: u32,
    /// Failed attempts (wrong finger/face, sensor glitch) before lockout
    pub max_failed_attempts: u32,
    /// Temporary lockout applied on escalation or `LockedOut` (ms)
    pub lockout_duration_ms: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            short_anim_delay_ms: 300,
            max_timeout_restarts: 1,
            max_failed_attempts: 5,
            lockout_duration_ms: 30_000,
        }
    }
}

impl RestartConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_retry_delay_ms(self.short_anim_delay_ms)?;
        validate_attempt_count("max_timeout_restarts", self.max_timeout_restarts)?;
        validate_attempt_count("max_failed_attempts", self.max_failed_attempts)?;
        validate_lockout_duration_ms(self.lockout_duration_ms)?;
        Ok(())
    }
}

/// What one module has been through during the current request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModuleHistory {
    /// Restarts already performed after a `Timeout`
    pub timeout_restarts: u32,
    /// Failed attempts already absorbed by a restart
    pub failed_attempts: u32,
}

impl ModuleHistory {
    /// Account for a restart triggered by `reason`
    pub fn note_restart(&mut self, reason: FailureReason) {
        match reason {
            FailureReason::Timeout => self.timeout_restarts += 1,
            _ => self.failed_attempts += 1,
        }
    }
}

/// Lockout write requested alongside a fatal decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutAction {
    Temporary(Duration),
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Re-invoke `authenticate()` on this module right away
    RetryNow,
    /// Re-invoke after a cooldown
    RetryAfter(Duration),
    /// Stop this module and record `reason` as its terminal result
    Fatal {
        reason: FailureReason,
        lockout: Option<LockoutAction>,
    },
}

impl RestartDecision {
    fn fatal(reason: FailureReason) -> Self {
        RestartDecision::Fatal {
            reason,
            lockout: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RestartPolicy {
    config: RestartConfig,
}

impl RestartPolicy {
    pub fn new(config: RestartConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RestartConfig {
        &self.config
    }

    pub fn decide(&self, reason: FailureReason, history: &ModuleHistory) -> RestartDecision {
        let lockout = Duration::from_millis(self.config.lockout_duration_ms);

        match reason {
            FailureReason::Timeout => {
                if history.timeout_restarts < self.config.max_timeout_restarts {
                    RestartDecision::RetryAfter(Duration::from_millis(
                        self.config.short_anim_delay_ms,
                    ))
                } else {
                    RestartDecision::fatal(FailureReason::Timeout)
                }
            }
            FailureReason::SensorFailed | FailureReason::AuthenticationFailed => {
                // This failure counts too
                if history.failed_attempts + 1 < self.config.max_failed_attempts {
                    RestartDecision::RetryNow
                } else {
                    RestartDecision::Fatal {
                        reason: FailureReason::LockedOut,
                        lockout: Some(LockoutAction::Temporary(lockout)),
                    }
                }
            }
            FailureReason::LockedOut => RestartDecision::Fatal {
                reason: FailureReason::LockedOut,
                lockout: Some(LockoutAction::Temporary(lockout)),
            },
            FailureReason::LockedOutPermanent => RestartDecision::Fatal {
                reason: FailureReason::LockedOutPermanent,
                lockout: Some(LockoutAction::Permanent),
            },
            FailureReason::Canceled
            | FailureReason::UserCanceled
            | FailureReason::NoHardware
            | FailureReason::HardwareUnavailable
            | FailureReason::NoBiometricsRegistered
            | FailureReason::Unknown => RestartDecision::fatal(reason),
        }
    }
}
