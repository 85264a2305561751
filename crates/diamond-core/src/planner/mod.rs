//! Facet cut planning.
//!
//! [`diff`] holds the pure selector arithmetic. [`FacetCutPlanner`] drives it
//! against a live chain: each redeployed facet's record and cuts are persisted
//! together in one update of the deployment-info file, so a crash never loses
//! a cut whose record already moved forward.

pub mod diff;
pub mod selectors;
pub mod submit;

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::chain::{ChainAdapter, DeployRequest, DeployedContract};
use crate::config::{FacetConfig, FacetVersion, FacetsConfig};
use crate::deployment::{
    DeployedDiamondInfo, DeployedFacetRecord, DeploymentInfoStore, PendingCallback,
};
use crate::error::{DeployError, Result};
use crate::steps::{DeploymentStep, StepRegistry, StepStatus, names};
use crate::types::DiamondIdentity;

pub use diff::{
    CutPlan, FacetDecision, FacetPlan, FacetPlanInput, FacetSource, SelectorDiff, compute_cuts,
    decide, plan_facet, removed_facet_cuts,
};
pub use selectors::{SelectorPolicy, SelectorRegistry};
pub use submit::{CutOutcome, CutSubmitter};

/// What one planning pass changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanOutcome {
    pub deployed: Vec<FacetPlan>,
    /// Facets already at their target version.
    pub current: Vec<(String, FacetVersion)>,
    /// Facets dropped from configuration and queued for removal.
    pub removed: Vec<String>,
}

impl PlanOutcome {
    pub fn is_empty(&self) -> bool {
        self.deployed.is_empty() && self.removed.is_empty()
    }
}

/// Deploys changed facets and queues their cuts in the pending batch.
pub struct FacetCutPlanner<'a> {
    pub identity: &'a DiamondIdentity,
    pub config: &'a FacetsConfig,
    pub policy: SelectorPolicy,
    /// Never removed, even though it is not part of the facet config.
    pub cut_facet: &'a str,
    pub chain: &'a dyn ChainAdapter,
    pub store: &'a DeploymentInfoStore,
}

impl FacetCutPlanner<'_> {
    /// Recorded facets absent from the configuration.
    pub fn dropped_facets(&self, info: &DeployedDiamondInfo) -> Vec<String> {
        info.deployed_facets
            .keys()
            .filter(|name| self.config.facet(name).is_none() && name.as_str() != self.cut_facet)
            .cloned()
            .collect()
    }

    /// Decide every facet without touching the chain.
    ///
    /// Surfaces upgrade-path errors before anything is deployed and reports
    /// whether a planning pass would change anything.
    pub fn has_work(&self, info: &DeployedDiamondInfo) -> Result<bool> {
        let mut work = !self.dropped_facets(info).is_empty();
        for facet in self.config.ordered() {
            if let FacetDecision::Deploy { .. } = decide(facet, info.facet(&facet.name))? {
                work = true;
            }
        }
        Ok(work)
    }

    /// Deploy every facet behind its target version and queue the cuts.
    pub async fn run(&self, steps: &mut StepRegistry) -> Result<PlanOutcome> {
        let deployment_id = steps.deployment_id().to_string();
        let info = self.store.load()?;
        self.has_work(&info)?;

        let mut registry = SelectorRegistry::from_records(&info.deployed_facets);
        let mut outcome = PlanOutcome::default();

        let dropped = self.dropped_facets(&info);
        if !dropped.is_empty() {
            let removals = removed_facet_cuts(
                self.config,
                &info.deployed_facets,
                &[self.cut_facet],
                &mut registry,
            );
            self.store.modify(|info| {
                for name in &dropped {
                    info.deployed_facets.remove(name);
                }
                info.queue_pending(&deployment_id, removals, Vec::new());
            })?;
            info!(
                diamond = %self.identity.diamond_name,
                facets = ?dropped,
                "Queued removal of facets dropped from configuration"
            );
            outcome.removed = dropped;
        }

        for facet in self.config.ordered() {
            let record = info.facet(&facet.name);
            let (from, to, is_upgrade) = match decide(facet, record)? {
                FacetDecision::Current { version } => {
                    debug!(
                        diamond = %self.identity.diamond_name,
                        facet = %facet.name,
                        version = %version,
                        "Facet is current, skipping"
                    );
                    self.settle_interrupted_step(facet, record, steps)?;
                    outcome.current.push((facet.name.clone(), version));
                    continue;
                }
                FacetDecision::Deploy {
                    from,
                    to,
                    is_upgrade,
                } => (from, to, is_upgrade),
            };

            let plan = self
                .deploy_facet(facet, record, is_upgrade, &deployment_id, &mut registry, steps)
                .await?;
            info!(
                diamond = %self.identity.diamond_name,
                facet = %facet.name,
                from = %from,
                to = %to,
                cuts = plan.cuts.len(),
                "Facet deployed"
            );
            outcome.deployed.push(plan);
        }
        Ok(outcome)
    }

    async fn deploy_facet(
        &self,
        facet: &FacetConfig,
        record: Option<&DeployedFacetRecord>,
        is_upgrade: bool,
        deployment_id: &str,
        registry: &mut SelectorRegistry,
        steps: &mut StepRegistry,
    ) -> Result<FacetPlan> {
        let target = facet.target_version();
        let libraries = self.deploy_libraries(facet, steps).await?;

        let step = names::deploy_facet(&facet.name, &target.to_string());
        let tracked = steps.begin_step(&step)?;
        if !tracked {
            tracing::warn!(
                step = %step,
                facet = %facet.name,
                "Deploy step already completed but the record is behind; redeploying"
            );
        }

        let result = self
            .deploy_and_plan(facet, record, is_upgrade, libraries, registry)
            .await;
        let (deployed, plan) = match result {
            Ok(done) => done,
            Err(err) => {
                if tracked {
                    steps.fail_step(&step, &err.to_string())?;
                }
                return Err(err);
            }
        };

        let callbacks: Vec<PendingCallback> = facet
            .target_spec()
            .map(|spec| spec.callback.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|name| PendingCallback {
                facet: facet.name.clone(),
                version: target,
                callback: name.clone(),
            })
            .collect();

        let new_record =
            DeployedFacetRecord::new(&deployed.address, &deployed.tx_hash, target, &plan.selectors);
        let cuts = plan.cuts.clone();
        self.store.modify(|info| {
            info.deployed_facets.insert(facet.name.clone(), new_record);
            info.queue_pending(deployment_id, cuts, callbacks);
        })?;

        if tracked {
            steps.save_step(
                DeploymentStep::new(&step, StepStatus::Completed)
                    .with_tx_hash(&deployed.tx_hash)
                    .with_contract_address(&deployed.address)
                    .with_gas(deployed.gas_used.clone(), deployed.gas_price.clone()),
            )?;
        }
        Ok(plan)
    }

    async fn deploy_and_plan(
        &self,
        facet: &FacetConfig,
        record: Option<&DeployedFacetRecord>,
        is_upgrade: bool,
        libraries: BTreeMap<String, String>,
        registry: &mut SelectorRegistry,
    ) -> Result<(DeployedContract, FacetPlan)> {
        let request = DeployRequest::new(&facet.name).with_libraries(libraries);
        let deployed = self
            .chain
            .deploy_contract(&request)
            .await
            .map_err(|err| DeployError::chain(format!("deploy {}", facet.name), err))?;

        let init_selector = match facet
            .target_spec()
            .and_then(|spec| spec.init_signature(is_upgrade))
        {
            Some(signature) => Some(
                self.chain
                    .encode_selector(signature)
                    .map_err(|err| DeployError::chain(format!("encode {signature}"), err))?,
            ),
            None => None,
        };

        let plan = plan_facet(
            FacetPlanInput {
                facet,
                record,
                facet_address: &deployed.address,
                introspected: &deployed.selectors,
                init_selector: init_selector.as_deref(),
            },
            registry,
            self.policy,
        )?;
        Ok((deployed, plan))
    }

    /// Deploy the facet's libraries, reusing addresses of completed steps.
    async fn deploy_libraries(
        &self,
        facet: &FacetConfig,
        steps: &mut StepRegistry,
    ) -> Result<BTreeMap<String, String>> {
        let mut linked = BTreeMap::new();
        for library in &facet.libraries {
            let step = names::deploy_library(&facet.name, library);
            if let Some(address) = steps
                .step(&step)
                .filter(|s| s.status == StepStatus::Completed)
                .and_then(|s| s.contract_address.clone())
            {
                linked.insert(library.clone(), address);
                continue;
            }

            steps.begin_step(&step)?;
            match self.chain.deploy_contract(&DeployRequest::new(library)).await {
                Ok(deployed) => {
                    steps.save_step(
                        DeploymentStep::new(&step, StepStatus::Completed)
                            .with_tx_hash(&deployed.tx_hash)
                            .with_contract_address(&deployed.address)
                            .with_gas(deployed.gas_used, deployed.gas_price),
                    )?;
                    debug!(facet = %facet.name, library = %library, address = %deployed.address, "Library deployed");
                    linked.insert(library.clone(), deployed.address);
                }
                Err(err) => {
                    steps.fail_step(&step, &err.to_string())?;
                    return Err(DeployError::chain(format!("deploy library {library}"), err));
                }
            }
        }
        Ok(linked)
    }

    /// Complete a deploy step left in progress by a crash after its record was written.
    fn settle_interrupted_step(
        &self,
        facet: &FacetConfig,
        record: Option<&DeployedFacetRecord>,
        steps: &mut StepRegistry,
    ) -> Result<()> {
        let Some(record) = record else {
            return Ok(());
        };
        let step = names::deploy_facet(&facet.name, &record.version.to_string());
        let interrupted = steps
            .step(&step)
            .map(|s| !s.status.is_terminal())
            .unwrap_or(false);
        if interrupted {
            steps.save_step(
                DeploymentStep::new(&step, StepStatus::Completed)
                    .with_tx_hash(&record.tx_hash)
                    .with_contract_address(&record.address),
            )?;
        }
        Ok(())
    }
}
