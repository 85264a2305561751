//! One coordinator per diamond identity within a process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Result;
use crate::types::DiamondIdentity;

use super::DeploymentCoordinator;

#[derive(Debug, Default)]
pub struct CoordinatorRegistry {
    coordinators: Mutex<HashMap<DiamondIdentity, Arc<DeploymentCoordinator>>>,
}

impl CoordinatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The coordinator for `identity`, built by `create` on first use.
    ///
    /// Identities compare case-insensitively, so every caller asking for the
    /// same diamond on the same network shares one coordinator.
    pub fn get_or_create<F>(
        &self,
        identity: &DiamondIdentity,
        create: F,
    ) -> Result<Arc<DeploymentCoordinator>>
    where
        F: FnOnce() -> Result<DeploymentCoordinator>,
    {
        let mut coordinators = self.lock();
        if let Some(existing) = coordinators.get(identity) {
            return Ok(Arc::clone(existing));
        }
        let coordinator = Arc::new(create()?);
        coordinators.insert(identity.clone(), Arc::clone(&coordinator));
        tracing::debug!(identity = %coordinator.identity(), "Coordinator created");
        Ok(coordinator)
    }

    /// Register an already built coordinator, keeping any existing one.
    pub fn insert(&self, coordinator: DeploymentCoordinator) -> Arc<DeploymentCoordinator> {
        let identity = coordinator.identity().clone();
        let mut coordinators = self.lock();
        Arc::clone(
            coordinators
                .entry(identity)
                .or_insert_with(|| Arc::new(coordinator)),
        )
    }

    pub fn get(&self, identity: &DiamondIdentity) -> Option<Arc<DeploymentCoordinator>> {
        self.lock().get(identity).cloned()
    }

    pub fn remove(&self, identity: &DiamondIdentity) -> Option<Arc<DeploymentCoordinator>> {
        self.lock().remove(identity)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DiamondIdentity, Arc<DeploymentCoordinator>>> {
        // The map stays consistent even if a holder panicked
        self.coordinators
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
