use std::collections::HashMap;
use std::sync::Arc;

use kubecc_core::ToolchainKind;

use super::ToolchainController;
use crate::error::ToolchainError;

/// Registry of toolchain controllers keyed by kind
#[derive(Default)]
pub struct ToolchainRunnerStore {
    controllers: HashMap<ToolchainKind, Arc<dyn ToolchainController>>,
}

impl ToolchainRunnerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `controller` for `kind`.
    ///
    /// # Panics
    ///
    /// Panics if a controller is already registered for `kind`.
    pub fn add(&mut self, kind: ToolchainKind, controller: Arc<dyn ToolchainController>) {
        if self.controllers.contains_key(&kind) {
            panic!("toolchain controller for kind {kind} is already registered");
        }
        self.controllers.insert(kind, controller);
    }

    pub fn get(&self, kind: ToolchainKind) -> Result<Arc<dyn ToolchainController>, ToolchainError> {
        self.controllers
            .get(&kind)
            .cloned()
            .ok_or(ToolchainError::NoRunnerForKind(kind))
    }

    pub fn kinds(&self) -> Vec<ToolchainKind> {
        self.controllers.keys().copied().collect()
    }
}

impl std::fmt::Debug for ToolchainRunnerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolchainRunnerStore")
            .field("kinds", &self.kinds())
            .finish()
    }
}
