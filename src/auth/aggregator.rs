//! Result aggregation for one authentication attempt
//!
//! The aggregator owns the module set, the confirmation policy and the
//! per-module terminal results. After every recorded event it decides whether
//! the attempt is finished and, if so, what the single verdict is. Once
//! sealed it never changes again.
//!
//! Rules:
//! - ANY: the first recorded `Success` wins. If every module resolves without
//!   a success, the verdict is `Failed` with every failure reason.
//! - ALL: `Succeeded` only when every module recorded `Success`; the first
//!   terminal `Failure` fails the whole attempt immediately.
//! - `Canceled(User)` cancels the whole attempt under both policies.
//! - `Canceled(Orchestrator)` resolves the module without vetoing. If every
//!   module is resolved and the only non-successes are such cancels, the
//!   verdict is `Canceled(Superseded)`.

use std::collections::HashMap;

use super::types::{
    AttemptResult, CancelOrigin, CancelReason, ConfirmationPolicy, ModuleFailure, ModuleId,
    ModuleSuccess, RequestId, Verdict,
};

/// Outcome of recording one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Stale request, duplicate, unknown module, or already sealed
    Ignored,
    /// The attempt continues
    Pending,
    /// The attempt just finished; returned exactly once
    Sealed(Verdict),
}

#[derive(Debug)]
pub struct ResultAggregator {
    request_id: RequestId,
    module_set: Vec<ModuleId>,
    policy: ConfirmationPolicy,
    results: HashMap<ModuleId, AttemptResult>,
    verdict: Option<Verdict>,
}

impl ResultAggregator {
    /// `module_set` is expected to be free of duplicates
    pub fn new(request_id: RequestId, module_set: Vec<ModuleId>, policy: ConfirmationPolicy) -> Self {
        Self {
            request_id,
            module_set,
            policy,
            results: HashMap::new(),
            verdict: None,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn policy(&self) -> ConfirmationPolicy {
        self.policy
    }

    pub fn module_set(&self) -> &[ModuleId] {
        &self.module_set
    }

    pub fn is_sealed(&self) -> bool {
        self.verdict.is_some()
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        self.verdict.as_ref()
    }

    pub fn result_for(&self, module: &ModuleId) -> Option<&AttemptResult> {
        self.results.get(module)
    }

    /// Modules without a terminal result, in module-set order
    pub fn pending(&self) -> Vec<ModuleId> {
        self.module_set
            .iter()
            .filter(|id| !self.results.contains_key(*id))
            .cloned()
            .collect()
    }

    pub fn record(
        &mut self,
        module: &ModuleId,
        result: AttemptResult,
        request_id: RequestId,
    ) -> Decision {
        if request_id != self.request_id {
            log::debug!(
                "Dropping stale event from {} for {} (active {})",
                module,
                request_id,
                self.request_id
            );
            return Decision::Ignored;
        }

        if self.is_sealed() || !self.module_set.contains(module) {
            return Decision::Ignored;
        }

        if !result.is_terminal() {
            return Decision::Pending;
        }

        if self.results.contains_key(module) {
            log::debug!("Dropping duplicate terminal event from {}", module);
            return Decision::Ignored;
        }

        self.results.insert(module.clone(), result.normalized());

        match self.evaluate(module) {
            Some(verdict) => {
                self.verdict = Some(verdict.clone());
                Decision::Sealed(verdict)
            }
            None => Decision::Pending,
        }
    }

    fn evaluate(&self, latest: &ModuleId) -> Option<Verdict> {
        match (self.policy, self.results.get(latest)?) {
            (_, AttemptResult::Canceled(CancelOrigin::User)) => {
                return Some(Verdict::Canceled(CancelReason::User));
            }
            (ConfirmationPolicy::Any, AttemptResult::Success(token)) => {
                return Some(Verdict::Succeeded(vec![ModuleSuccess {
                    module: latest.clone(),
                    token: token.clone(),
                }]));
            }
            (ConfirmationPolicy::All, AttemptResult::Failure(_)) => {
                return Some(Verdict::Failed(self.failures()));
            }
            _ => {}
        }

        if self.results.len() < self.module_set.len() {
            return None;
        }

        let successes = self.successes();
        if self.policy == ConfirmationPolicy::All && successes.len() == self.module_set.len() {
            return Some(Verdict::Succeeded(successes));
        }

        let failures = self.failures();
        if failures.is_empty() {
            Some(Verdict::Canceled(CancelReason::Superseded))
        } else {
            Some(Verdict::Failed(failures))
        }
    }

    fn successes(&self) -> Vec<ModuleSuccess> {
        self.module_set
            .iter()
            .filter_map(|id| match self.results.get(id) {
                Some(AttemptResult::Success(token)) => Some(ModuleSuccess {
                    module: id.clone(),
                    token: token.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    fn failures(&self) -> Vec<ModuleFailure> {
        self.module_set
            .iter()
            .filter_map(|id| match self.results.get(id) {
                Some(AttemptResult::Failure(reason)) => Some(ModuleFailure {
                    module: id.clone(),
                    reason: *reason,
                }),
                _ => None,
            })
            .collect()
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::auth::types::{AuthToken, FailureReason};
    use proptest::prelude::*;

    fn modules() -> Vec<ModuleId> {
        vec![ModuleId::Fingerprint, ModuleId::Face, ModuleId::Iris]
    }

    fn result_strategy() -> impl Strategy<Value = AttemptResult> {
        prop_oneof![
            any::<u8>().prop_map(|b| AttemptResult::Success(AuthToken::new(vec![b]))),
            Just(AttemptResult::Failure(FailureReason::AuthenticationFailed)),
            Just(AttemptResult::Failure(FailureReason::LockedOut)),
            Just(AttemptResult::Canceled(CancelOrigin::Orchestrator)),
            Just(AttemptResult::Help("hint".to_string())),
        ]
    }

    fn events() -> impl Strategy<Value = Vec<(usize, AttemptResult)>> {
        prop::collection::vec((0usize..3, result_strategy()), 0..24)
    }

    proptest! {
        #[test]
        fn first_terminal_event_per_module_is_kept(events in events()) {
            let modules = modules();
            let req = RequestId::next();
            let mut agg = ResultAggregator::new(req, modules.clone(), ConfirmationPolicy::All);
            let mut first: HashMap<ModuleId, AttemptResult> = HashMap::new();

            for (idx, result) in events {
                let module = &modules[idx];
                let sealed_before = agg.is_sealed();
                let decision = agg.record(module, result.clone(), req);
                if !sealed_before && result.is_terminal() && !first.contains_key(module) {
                    prop_assert!(decision != Decision::Ignored);
                    first.insert(module.clone(), result);
                }
            }

            for (module, result) in &first {
                prop_assert_eq!(agg.result_for(module), Some(result));
            }
        }

        #[test]
        fn any_policy_has_single_winner(events in events()) {
            let modules = modules();
            let req = RequestId::next();
            let mut agg = ResultAggregator::new(req, modules.clone(), ConfirmationPolicy::Any);
            let mut sealed = Vec::new();
            let mut first_success: Option<ModuleId> = None;

            for (idx, result) in events {
                let module = &modules[idx];
                let open = !agg.is_sealed() && agg.result_for(module).is_none();
                if open && first_success.is_none() && result.is_success() {
                    first_success = Some(module.clone());
                }
                if let Decision::Sealed(verdict) = agg.record(module, result, req) {
                    sealed.push(verdict);
                }
            }

            prop_assert!(sealed.len() <= 1);
            if let Some(winner) = first_success {
                match sealed.first() {
                    Some(Verdict::Succeeded(payloads)) => {
                        prop_assert_eq!(payloads.len(), 1);
                        prop_assert_eq!(&payloads[0].module, &winner);
                    }
                    other => prop_assert!(false, "expected success verdict, got {:?}", other),
                }
            }
        }
    }
}
