//! Step registry document: one file per (diamond, deployment id).

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Whether `self -> next` moves forward through the lifecycle.
    ///
    /// `failed -> pending` only happens through an explicit reset.
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::Pending => true,
            Self::InProgress => next.is_terminal(),
            Self::Completed | Self::Failed | Self::Skipped => false,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStep {
    pub step_name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    /// Decimal string; gas figures can exceed what JSON numbers carry safely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    /// Unix milliseconds of the last status change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retry_count: u32,
}

impl DeploymentStep {
    pub fn new(step_name: impl Into<String>, status: StepStatus) -> Self {
        Self {
            step_name: step_name.into(),
            status,
            tx_hash: None,
            contract_address: None,
            gas_used: None,
            gas_price: None,
            timestamp: Some(now_millis()),
            error: None,
            retry_count: 0,
        }
    }

    pub fn pending(step_name: impl Into<String>) -> Self {
        Self::new(step_name, StepStatus::Pending)
    }

    pub fn with_tx_hash(mut self, tx_hash: impl Into<String>) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self
    }

    pub fn with_contract_address(mut self, address: impl Into<String>) -> Self {
        self.contract_address = Some(address.into());
        self
    }

    pub fn with_gas(mut self, gas_used: Option<String>, gas_price: Option<String>) -> Self {
        self.gas_used = gas_used;
        self.gas_price = gas_price;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Aggregate counts over a registry's steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub is_complete: bool,
    pub has_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRegistry {
    pub diamond_name: String,
    pub deployment_id: String,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub chain_id: u64,
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default)]
    pub deployer_address: String,
    #[serde(default)]
    pub steps: Vec<DeploymentStep>,
    #[serde(default)]
    pub started_at: i64,
    #[serde(default)]
    pub last_updated: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl DeploymentRegistry {
    /// Fresh registry with every scalar header field empty or zero.
    pub fn empty(diamond_name: &str, deployment_id: &str) -> Self {
        Self {
            diamond_name: diamond_name.to_string(),
            deployment_id: deployment_id.to_string(),
            network: String::new(),
            chain_id: 0,
            rpc_url: String::new(),
            deployer_address: String::new(),
            steps: Vec::new(),
            started_at: 0,
            last_updated: 0,
            completed_at: None,
            failed_at: None,
            last_error: None,
        }
    }

    pub fn step(&self, step_name: &str) -> Option<&DeploymentStep> {
        self.steps.iter().find(|s| s.step_name == step_name)
    }

    pub fn step_mut(&mut self, step_name: &str) -> Option<&mut DeploymentStep> {
        self.steps.iter_mut().find(|s| s.step_name == step_name)
    }

    pub fn steps_with(&self, statuses: &[StepStatus]) -> Vec<&DeploymentStep> {
        self.steps
            .iter()
            .filter(|s| statuses.contains(&s.status))
            .collect()
    }

    pub fn summary(&self) -> DeploymentSummary {
        let completed = self.steps_with(&[StepStatus::Completed]).len();
        let failed = self.steps_with(&[StepStatus::Failed]).len();
        let pending = self
            .steps_with(&[StepStatus::Pending, StepStatus::InProgress])
            .len();
        DeploymentSummary {
            total: self.steps.len(),
            completed,
            failed,
            pending,
            is_complete: failed == 0 && pending == 0 && completed > 0,
            has_failed: failed > 0,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_updated = now_millis();
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
