//! Error taxonomy for deployment orchestration.
//!
//! Configuration and collision errors are raised before any chain call that
//! depends on them. Chain errors carry whatever the adapter reported.

use std::path::PathBuf;

use crate::steps::StepStatus;

pub type Result<T> = std::result::Result<T, DeployError>;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Missing or unusable configuration (paths, networks, project config).
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration for facet '{facet}': {reason}")]
    InvalidFacetConfig { facet: String, reason: String },

    #[error("diamond '{diamond}' has no deployed address on network '{network}'; deploy it first")]
    DiamondNotDeployed { diamond: String, network: String },

    #[error(
        "facet '{facet}' cannot upgrade from version {from} to {to}; allowed origins: {allowed:?}"
    )]
    UpgradePathNotAllowed {
        facet: String,
        from: String,
        to: String,
        allowed: Vec<String>,
    },

    #[error("selector {selector} of facet '{facet}' is already bound to facet '{owner}'")]
    SelectorCollision {
        selector: String,
        facet: String,
        owner: String,
    },

    #[error("chain error during {operation}: {source}")]
    Chain {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("diamond cut transaction {tx_hash} reverted")]
    CutReverted { tx_hash: String },

    #[error("transaction {tx_hash} for {operation} reverted")]
    TransactionReverted { operation: String, tx_hash: String },

    #[error("corrupt state file {}: {reason}", path.display())]
    CorruptState { path: PathBuf, reason: String },

    #[error("step '{step}' cannot move from {from} to {to}")]
    InvalidStepTransition {
        step: String,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("callback '{name}' referenced by facet '{facet}' is not registered")]
    UnknownCallback { facet: String, name: String },

    #[error("callback '{name}' for facet '{facet}' failed: {source}")]
    Callback {
        facet: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DeployError {
    pub fn chain(operation: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Chain {
            operation: operation.into(),
            source,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_facet(facet: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFacetConfig {
            facet: facet.into(),
            reason: reason.into(),
        }
    }

    /// Errors that require the operator to fix configuration before re-running.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::InvalidFacetConfig { .. }
                | Self::DiamondNotDeployed { .. }
                | Self::UpgradePathNotAllowed { .. }
                | Self::SelectorCollision { .. }
                | Self::UnknownCallback { .. }
        )
    }
}
