//! Deployed-diamond info: what is live on one network.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::FacetVersion;
use crate::types::FacetCut;

/// Last deployment of one facet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedFacetRecord {
    pub address: String,
    pub tx_hash: String,
    pub version: FacetVersion,
    /// Selectors routed to this facet, in introspection order without duplicates.
    pub func_selectors: Vec<String>,
    #[serde(default)]
    pub verified: bool,
}

impl DeployedFacetRecord {
    pub fn new(
        address: impl Into<String>,
        tx_hash: impl Into<String>,
        version: FacetVersion,
        selectors: &[String],
    ) -> Self {
        let mut func_selectors: Vec<String> = Vec::with_capacity(selectors.len());
        for selector in selectors {
            if !func_selectors.contains(selector) {
                func_selectors.push(selector.clone());
            }
        }
        Self {
            address: address.into(),
            tx_hash: tx_hash.into(),
            version,
            func_selectors,
            verified: false,
        }
    }
}

/// Callback owed to a facet once its cut is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCallback {
    pub facet: String,
    pub version: FacetVersion,
    pub callback: String,
}

/// Cuts computed for facets whose records already moved forward, but not yet
/// confirmed on chain together with their init calls and callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCuts {
    pub deployment_id: String,
    #[serde(default)]
    pub cuts: Vec<FacetCut>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub callbacks: Vec<PendingCallback>,
}

impl PendingCuts {
    pub fn new(deployment_id: &str) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            cuts: Vec::new(),
            callbacks: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty() && self.callbacks.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedDiamondInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diamond_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployer_address: Option<String>,
    #[serde(default)]
    pub deployed_facets: BTreeMap<String, DeployedFacetRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_cuts: Option<PendingCuts>,
}

impl DeployedDiamondInfo {
    pub fn facet(&self, name: &str) -> Option<&DeployedFacetRecord> {
        self.deployed_facets.get(name)
    }

    /// Recorded version of a facet, `0` when it was never deployed.
    pub fn deployed_version(&self, name: &str) -> FacetVersion {
        self.facet(name)
            .map(|record| record.version)
            .unwrap_or(FacetVersion::ZERO)
    }

    /// Append work to the pending batch of `deployment_id`, creating it if needed.
    pub fn queue_pending(
        &mut self,
        deployment_id: &str,
        cuts: Vec<FacetCut>,
        callbacks: Vec<PendingCallback>,
    ) {
        if cuts.is_empty() && callbacks.is_empty() {
            return;
        }
        let pending = self
            .pending_cuts
            .get_or_insert_with(|| PendingCuts::new(deployment_id));
        pending.cuts.extend(cuts);
        pending.callbacks.extend(callbacks);
    }
}
