use thiserror::Error;

use super::types::{ModuleId, RequestId};
use crate::validation::ValidationError;

/// Misuse of the orchestrator API
///
/// Module failures are never errors; they arrive as data and end up in the
/// verdict.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("An authentication request is already in progress ({active})")]
    AlreadyRunning { active: RequestId },

    #[error("Module set is empty")]
    EmptyModuleSet,

    #[error("Module listed more than once: {0}")]
    DuplicateModule(ModuleId),

    #[error("No module registered for: {0}")]
    UnknownModule(ModuleId),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}
