//! Deployment step registry: crash-safe bookkeeping of named steps.

pub mod store;
pub mod types;

pub use store::StepRegistry;
pub use types::{DeploymentRegistry, DeploymentStep, DeploymentSummary, StepStatus};

/// Well-known step names used by the coordinator.
pub mod names {
    pub const DEPLOY_CUT_FACET: &str = "deploy-cut-facet";
    pub const DEPLOY_DIAMOND: &str = "deploy-diamond";
    pub const DIAMOND_CUT: &str = "diamond-cut";

    pub fn deploy_facet(facet: &str, version: &str) -> String {
        format!("deploy-facet:{facet}:v{version}")
    }

    pub fn deploy_library(facet: &str, library: &str) -> String {
        format!("deploy-library:{facet}:{library}")
    }

    pub fn init(facet: &str) -> String {
        format!("init:{facet}")
    }

    pub fn callback(facet: &str, callback: &str) -> String {
        format!("callback:{facet}:{callback}")
    }
}
