//! Diamond Deployer Core Library
//!
//! Deploys and upgrades EIP-2535 diamond proxies: plans facet cuts from a
//! versioned facet configuration, tracks every on-chain step in a crash-safe
//! registry, and serializes deploys and upgrades per diamond.

pub mod artifacts;
pub mod callbacks;
pub mod chain;
pub mod config;
pub mod coordinator;
pub mod deployment;
pub mod error;
pub mod fs;
pub mod planner;
pub mod steps;
pub mod types;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{
        ConfigResolver, DiamondPaths, FacetConfig, FacetVersion, FacetsConfig, ProjectConfig,
        ResolvedDiamond, VersionSpec,
    };

    // Chain
    pub use crate::chain::{ChainAdapter, ContractHandle, DeployRequest, DeployedContract, TxReceipt};

    // Coordination
    pub use crate::callbacks::{CallbackContext, CallbackRegistry, PostDeployCallback};
    pub use crate::coordinator::{
        CoordinatorOptions, CoordinatorRegistry, CoordinatorStatus, DeploymentCoordinator,
        Operation, Phase,
    };

    // Planning
    pub use crate::planner::{CutPlan, FacetCutPlanner, SelectorDiff, SelectorPolicy};

    // State
    pub use crate::deployment::{DeployedDiamondInfo, DeployedFacetRecord, DeploymentInfoStore};
    pub use crate::steps::{DeploymentRegistry, DeploymentStep, StepRegistry, StepStatus};

    // Errors and shared types
    pub use crate::error::{DeployError, Result};
    pub use crate::types::{DiamondIdentity, FacetCut, FacetCutAction};
}
