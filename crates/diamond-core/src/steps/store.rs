//! File-backed step registry.
//!
//! Every mutation rewrites the registry file atomically, so a crashed run
//! leaves the last fully written state behind.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{DeployError, Result};
use crate::fs::{read_json, write_json_atomic};

use super::types::{DeploymentRegistry, DeploymentStep, DeploymentSummary, StepStatus, now_millis};

/// Durable record of named steps for one (diamond, deployment id).
#[derive(Debug)]
pub struct StepRegistry {
    path: PathBuf,
    registry: DeploymentRegistry,
}

impl StepRegistry {
    /// Location of a registry file inside a diamond's steps directory.
    pub fn registry_path(steps_dir: &Path, deployment_id: &str) -> PathBuf {
        steps_dir.join(format!("{deployment_id}.json"))
    }

    /// Load the registry, or start an empty one if the file is absent.
    ///
    /// A malformed file is an error; state is never silently reset.
    pub fn open(steps_dir: &Path, diamond_name: &str, deployment_id: &str) -> Result<Self> {
        let path = Self::registry_path(steps_dir, deployment_id);
        let registry = match read_json::<DeploymentRegistry>(&path)? {
            Some(existing) => {
                if existing.deployment_id != deployment_id {
                    return Err(DeployError::CorruptState {
                        path,
                        reason: format!(
                            "registry belongs to deployment '{}', expected '{}'",
                            existing.deployment_id, deployment_id
                        ),
                    });
                }
                existing
            }
            None => DeploymentRegistry::empty(diamond_name, deployment_id),
        };
        Ok(Self { path, registry })
    }

    /// All registries stored in `steps_dir`, ordered by start time.
    pub fn list(steps_dir: &Path) -> Result<Vec<DeploymentRegistry>> {
        let entries = match fs::read_dir(steps_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(DeployError::io(steps_dir, err)),
        };

        let mut registries = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| DeployError::io(steps_dir, err))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(registry) = read_json::<DeploymentRegistry>(&path)? {
                registries.push(registry);
            }
        }
        registries.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.deployment_id.cmp(&b.deployment_id))
        });
        Ok(registries)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn registry(&self) -> &DeploymentRegistry {
        &self.registry
    }

    pub fn deployment_id(&self) -> &str {
        &self.registry.deployment_id
    }

    /// Set the header fields describing where this deployment runs.
    pub fn initialize_deployment(
        &mut self,
        network: &str,
        chain_id: u64,
        rpc_url: &str,
        deployer_address: &str,
    ) -> Result<()> {
        let header = &mut self.registry;
        header.network = network.to_string();
        header.chain_id = chain_id;
        header.rpc_url = rpc_url.to_string();
        header.deployer_address = deployer_address.to_string();
        if header.started_at == 0 {
            header.started_at = now_millis();
        }
        self.persist()
    }

    /// Insert or replace a step by name.
    pub fn save_step(&mut self, mut step: DeploymentStep) -> Result<()> {
        if step.timestamp.is_none() {
            step.timestamp = Some(now_millis());
        }
        match self.registry.step_mut(&step.step_name) {
            Some(existing) => {
                if !existing.status.can_transition_to(step.status) {
                    return Err(DeployError::InvalidStepTransition {
                        step: step.step_name,
                        from: existing.status,
                        to: step.status,
                    });
                }
                step.retry_count = step.retry_count.max(existing.retry_count);
                *existing = step;
            }
            None => self.registry.steps.push(step),
        }
        self.persist()
    }

    /// Partially update an existing step. Returns `false` if the step is unknown.
    pub fn update_status(
        &mut self,
        step_name: &str,
        status: StepStatus,
        tx_hash: Option<&str>,
        contract_address: Option<&str>,
        error: Option<&str>,
    ) -> Result<bool> {
        let Some(step) = self.registry.step_mut(step_name) else {
            return Ok(false);
        };
        if !step.status.can_transition_to(status) {
            return Err(DeployError::InvalidStepTransition {
                step: step_name.to_string(),
                from: step.status,
                to: status,
            });
        }
        step.status = status;
        step.timestamp = Some(now_millis());
        if let Some(tx_hash) = tx_hash {
            step.tx_hash = Some(tx_hash.to_string());
        }
        if let Some(address) = contract_address {
            step.contract_address = Some(address.to_string());
        }
        if let Some(error) = error {
            step.error = Some(error.to_string());
        }
        self.persist()?;
        Ok(true)
    }

    /// Move a failed step back to pending so it can be retried.
    ///
    /// Returns `false` if the step is unknown or not failed.
    pub fn reset_step(&mut self, step_name: &str) -> Result<bool> {
        let Some(step) = self.registry.step_mut(step_name) else {
            return Ok(false);
        };
        if step.status != StepStatus::Failed {
            return Ok(false);
        }
        step.status = StepStatus::Pending;
        step.retry_count += 1;
        step.error = None;
        step.timestamp = Some(now_millis());
        tracing::debug!(step = step_name, retry = step.retry_count, "Reset failed step");
        self.persist()?;
        Ok(true)
    }

    pub fn step(&self, step_name: &str) -> Option<&DeploymentStep> {
        self.registry.step(step_name)
    }

    pub fn is_step_completed(&self, step_name: &str) -> bool {
        self.step_has_status(step_name, StepStatus::Completed)
    }

    pub fn is_step_failed(&self, step_name: &str) -> bool {
        self.step_has_status(step_name, StepStatus::Failed)
    }

    fn step_has_status(&self, step_name: &str, status: StepStatus) -> bool {
        self.registry
            .step(step_name)
            .map(|s| s.status == status)
            .unwrap_or(false)
    }

    pub fn completed_steps(&self) -> Vec<&DeploymentStep> {
        self.registry.steps_with(&[StepStatus::Completed])
    }

    pub fn failed_steps(&self) -> Vec<&DeploymentStep> {
        self.registry.steps_with(&[StepStatus::Failed])
    }

    /// Steps not yet finished: pending and in progress.
    pub fn pending_steps(&self) -> Vec<&DeploymentStep> {
        self.registry
            .steps_with(&[StepStatus::Pending, StepStatus::InProgress])
    }

    pub fn summary(&self) -> DeploymentSummary {
        self.registry.summary()
    }

    pub fn mark_deployment_complete(&mut self) -> Result<()> {
        self.registry.completed_at = Some(now_millis());
        self.persist()
    }

    pub fn mark_deployment_failed(&mut self, error: &str) -> Result<()> {
        self.registry.failed_at = Some(now_millis());
        self.registry.last_error = Some(error.to_string());
        self.persist()
    }

    /// Drop every failed step record. Returns how many were removed.
    pub fn clear_failed_steps(&mut self) -> Result<usize> {
        let before = self.registry.steps.len();
        self.registry
            .steps
            .retain(|s| s.status != StepStatus::Failed);
        let removed = before - self.registry.steps.len();
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Mark a step in progress before running it.
    ///
    /// A failed step is reset first, so re-running retries it. Returns `false`
    /// when the step already finished and must not run again.
    pub fn begin_step(&mut self, step_name: &str) -> Result<bool> {
        match self.registry.step(step_name).map(|s| s.status) {
            Some(StepStatus::Completed | StepStatus::Skipped) => return Ok(false),
            Some(StepStatus::Failed) => {
                self.reset_step(step_name)?;
            }
            _ => {}
        }
        self.save_step(DeploymentStep::new(step_name, StepStatus::InProgress))?;
        tracing::debug!(step = step_name, "Step started");
        Ok(true)
    }

    /// Record the failure of a running step.
    ///
    /// A step that already reached a terminal status keeps it.
    pub fn fail_step(&mut self, step_name: &str, error: &str) -> Result<()> {
        if let Some(step) = self.registry.step(step_name) {
            if step.status.is_terminal() {
                tracing::warn!(step = step_name, status = %step.status, "Ignoring failure of finished step");
                return Ok(());
            }
        }
        tracing::debug!(step = step_name, error, "Step failed");
        self.save_step(DeploymentStep::new(step_name, StepStatus::Failed).with_error(error))
    }

    fn persist(&mut self) -> Result<()> {
        self.registry.touch();
        write_json_atomic(&self.path, &self.registry)
    }
}
