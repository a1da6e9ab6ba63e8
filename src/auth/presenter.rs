//! Presentation layer hooks
//!
//! Purely informational: nothing a presenter does feeds back into the
//! decision.

use super::types::{ModuleId, RequestId};

pub trait Presenter: Send + Sync {
    /// Called exactly once per `start()`
    fn on_ui_opened(&self, request: RequestId);

    /// Called exactly once when the request reaches a terminal state
    fn on_ui_closed(&self, request: RequestId);

    fn on_help(&self, module: &ModuleId, text: &str);
}

/// Presenter that only logs (headless use and the CLI)
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn on_ui_opened(&self, request: RequestId) {
        log::info!("[{}] Authentication prompt opened", request);
    }

    fn on_ui_closed(&self, request: RequestId) {
        log::info!("[{}] Authentication prompt closed", request);
    }

    fn on_help(&self, module: &ModuleId, text: &str) {
        log::info!("{}: {}", module, text);
    }
}
