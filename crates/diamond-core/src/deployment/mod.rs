//! Deployed-diamond state: facet records and the pending cut batch.

pub mod info;
pub mod store;

pub use info::{DeployedDiamondInfo, DeployedFacetRecord, PendingCallback, PendingCuts};
pub use store::DeploymentInfoStore;
