//! Static module registry
//!
//! Backends are registered once at configuration time. Selecting a module is
//! a map lookup by [`ModuleId`]; there is no runtime discovery.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::OrchestratorError;
use super::module::AuthenticatorModule;
use super::types::ModuleId;

#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<ModuleId, Arc<dyn AuthenticatorModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under its own id, replacing any previous one
    pub fn register(&mut self, module: Arc<dyn AuthenticatorModule>) -> &mut Self {
        let id = module.id();
        if self.modules.insert(id.clone(), module).is_some() {
            log::warn!("Module {} registered twice; keeping the latest", id);
        } else {
            log::debug!("Registered module: {}", id);
        }
        self
    }

    pub fn get(&self, id: &ModuleId) -> Option<Arc<dyn AuthenticatorModule>> {
        self.modules.get(id).cloned()
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.modules.contains_key(id)
    }

    pub fn ids(&self) -> Vec<ModuleId> {
        self.modules.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Resolve an ordered module set, rejecting empty sets, duplicates and
    /// unregistered ids
    pub fn resolve(
        &self,
        ids: &[ModuleId],
    ) -> Result<Vec<(ModuleId, Arc<dyn AuthenticatorModule>)>, OrchestratorError> {
        if ids.is_empty() {
            return Err(OrchestratorError::EmptyModuleSet);
        }

        let mut resolved: Vec<(ModuleId, Arc<dyn AuthenticatorModule>)> =
            Vec::with_capacity(ids.len());
        for id in ids {
            if resolved.iter().any(|(seen, _)| seen == id) {
                return Err(OrchestratorError::DuplicateModule(id.clone()));
            }
            let module = self
                .get(id)
                .ok_or_else(|| OrchestratorError::UnknownModule(id.clone()))?;
            resolved.push((id.clone(), module));
        }

        Ok(resolved)
    }
}
