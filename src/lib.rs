//! Multi-sensor biometric authentication orchestrator
//!
//! Runs several authenticator modules (fingerprint, face, iris, vendor
//! engines) in parallel for one request and combines their results into a
//! single verdict under an ANY or ALL confirmation policy.

pub mod auth;
pub mod config;
pub mod paths;
pub mod runtime;
pub mod sensors;
pub mod validation;

pub use auth::{
    AttemptResult, AuthenticatorModule, CancelReason, ConfirmationPolicy, FailureReason,
    ModuleId, Orchestrator, OrchestratorError, OrchestratorState, Verdict,
};
pub use config::AppConfig;
pub use paths::AppPaths;
pub use runtime::{AuthRuntime, UnlockEvent};
