//! Deployment coordinator: the deploy/upgrade state machine of one diamond.
//!
//! A coordinator serializes every deploy and upgrade of its identity. Callers
//! arriving while an operation runs are parked on a watch channel and get the
//! state that operation leaves behind.

pub mod registry;
pub mod state;

use std::fmt;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::callbacks::CallbackRegistry;
use crate::chain::{ChainAdapter, DeployRequest, DeployedContract};
use crate::config::{FacetVersion, FacetsConfig, ResolvedDiamond};
use crate::deployment::{DeployedDiamondInfo, DeployedFacetRecord, DeploymentInfoStore};
use crate::error::{DeployError, Result};
use crate::planner::{CutSubmitter, FacetCutPlanner, PlanOutcome, SelectorPolicy};
use crate::steps::{DeploymentStep, StepRegistry, StepStatus, names};
use crate::types::DiamondIdentity;

pub use registry::CoordinatorRegistry;
pub use state::{CoordinatorStatus, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Deploy,
    Upgrade,
}

impl Operation {
    fn prefix(self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Upgrade => "upgrade",
        }
    }
}

/// Caller overrides for a coordinator's runs.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorOptions {
    /// Registry id for every run; defaults to one derived from the facet config.
    pub deployment_id: Option<String>,
    /// Overrides the diamond's configured selector policy.
    pub selector_policy: Option<SelectorPolicy>,
}

/// Default deployment id: operation plus a fingerprint of the facet set.
pub fn default_deployment_id(operation: Operation, config: &FacetsConfig) -> String {
    format!("{}-{}", operation.prefix(), config.fingerprint())
}

/// Identity of a resolved diamond; the network must be declared.
pub fn identity_of(diamond: &ResolvedDiamond) -> Result<DiamondIdentity> {
    let network = diamond.require_network()?;
    Ok(DiamondIdentity::new(
        &diamond.network,
        network.chain_id,
        &diamond.name,
    ))
}

pub struct DeploymentCoordinator {
    identity: DiamondIdentity,
    diamond: ResolvedDiamond,
    chain: Arc<dyn ChainAdapter>,
    callbacks: CallbackRegistry,
    options: CoordinatorOptions,
    status: watch::Sender<CoordinatorStatus>,
}

impl fmt::Debug for DeploymentCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentCoordinator")
            .field("identity", &self.identity)
            .field("status", &*self.status.borrow())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl DeploymentCoordinator {
    pub fn new(diamond: ResolvedDiamond, chain: Arc<dyn ChainAdapter>) -> Result<Self> {
        let identity = identity_of(&diamond)?;
        let (status, _) = watch::channel(CoordinatorStatus::default());
        Ok(Self {
            identity,
            diamond,
            chain,
            callbacks: CallbackRegistry::new(),
            options: CoordinatorOptions::default(),
            status,
        })
    }

    pub fn with_callbacks(mut self, callbacks: CallbackRegistry) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_options(mut self, options: CoordinatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn identity(&self) -> &DiamondIdentity {
        &self.identity
    }

    pub fn diamond(&self) -> &ResolvedDiamond {
        &self.diamond
    }

    pub fn status(&self) -> CoordinatorStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every phase change.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorStatus> {
        self.status.subscribe()
    }

    pub fn info_store(&self) -> DeploymentInfoStore {
        DeploymentInfoStore::new(&self.diamond.paths.deployed_diamond_data_file_path)
    }

    pub fn deployment_info(&self) -> Result<DeployedDiamondInfo> {
        self.info_store().load()
    }

    pub fn deployment_id(&self, operation: Operation, config: &FacetsConfig) -> String {
        self.options
            .deployment_id
            .clone()
            .unwrap_or_else(|| default_deployment_id(operation, config))
    }

    pub fn selector_policy(&self) -> SelectorPolicy {
        self.options
            .selector_policy
            .unwrap_or_else(|| self.diamond.selector_policy())
    }

    /// Step registry of one of this diamond's deployments.
    pub fn step_registry(&self, deployment_id: &str) -> Result<StepRegistry> {
        StepRegistry::open(&self.diamond.paths.steps_dir, &self.diamond.name, deployment_id)
    }

    /// Deploy the diamond and all configured facets.
    ///
    /// Returns the recorded info without touching the chain when the diamond
    /// is already deployed. An interrupted deployment resumes from its steps.
    pub async fn deploy(&self) -> Result<DeployedDiamondInfo> {
        let completed = self.status.borrow().deploy_completed;
        if completed {
            return self.deployment_info();
        }
        if let Some(info) = self.finished_deployment()? {
            self.status.send_modify(|s| s.deploy_completed = true);
            return Ok(info);
        }

        let Some(guard) = state::claim(&self.status, Phase::Deploying).await else {
            return self.deployment_info();
        };
        if let Some(info) = self.finished_deployment()? {
            guard.finish(|s| s.deploy_completed = true);
            return Ok(info);
        }

        let config = self.diamond.load_facets()?;
        let mut steps = self.step_registry(&self.deployment_id(Operation::Deploy, &config))?;
        info!(
            diamond = %self.diamond.name,
            network = %self.diamond.network,
            deployment_id = %steps.deployment_id(),
            "Deploying diamond"
        );
        let result = self.run_deploy(&config, &mut steps).await;
        let info = settle(&mut steps, result)?;
        guard.finish(|s| s.deploy_completed = true);
        Ok(info)
    }

    /// Bring an existing diamond's facets in line with the configuration.
    ///
    /// Waits out a deploy in flight, so the diamond is only required once the
    /// phase is claimed.
    pub async fn upgrade(&self) -> Result<DeployedDiamondInfo> {
        let Some(guard) = state::claim(&self.status, Phase::Upgrading).await else {
            return self.deployment_info();
        };
        let diamond_address = self.require_diamond()?;

        let config = self.diamond.load_facets()?;
        let mut steps = self.step_registry(&self.deployment_id(Operation::Upgrade, &config))?;
        info!(
            diamond = %self.diamond.name,
            network = %self.diamond.network,
            deployment_id = %steps.deployment_id(),
            "Upgrading diamond"
        );
        let result = self.run_upgrade(&config, &mut steps, &diamond_address).await;
        let info = settle(&mut steps, result)?;
        guard.finish(|s| s.upgrade_completed = true);
        Ok(info)
    }

    /// Impersonate and fund `address`; only dev networks allow it.
    pub async fn impersonate_and_fund(&self, address: &str) -> Result<()> {
        let network = self.diamond.require_network()?;
        if !network.dev {
            return Err(DeployError::Config(format!(
                "network '{}' is not a dev network; impersonation is unavailable",
                self.diamond.network
            )));
        }
        self.chain
            .impersonate_and_fund(address)
            .await
            .map_err(|err| DeployError::chain(format!("impersonate {address}"), err))
    }

    async fn run_deploy(
        &self,
        config: &FacetsConfig,
        steps: &mut StepRegistry,
    ) -> Result<DeployedDiamondInfo> {
        let store = self.info_store();
        self.preflight(config, steps, &store.load()?)?;
        let owner = self.begin_run(steps).await?;

        let cut_facet = self.diamond.cut_facet();
        let recorded_cut = store.load()?.facet(cut_facet).map(|r| r.address.clone());
        let cut_address = match recorded_cut {
            Some(address) => address,
            None => {
                let request = DeployRequest::new(cut_facet);
                let version = config
                    .facet(cut_facet)
                    .map(|f| f.target_version())
                    .unwrap_or(FacetVersion::ZERO);
                let deployed = self
                    .deploy_tracked(steps, names::DEPLOY_CUT_FACET, &request, |info, deployed| {
                        info.deployed_facets.insert(
                            cut_facet.to_string(),
                            DeployedFacetRecord::new(
                                &deployed.address,
                                &deployed.tx_hash,
                                version,
                                &deployed.selectors,
                            ),
                        );
                    })
                    .await?;
                deployed.address
            }
        };

        let recorded_diamond = store.load()?.diamond_address;
        let diamond_address = match recorded_diamond {
            Some(address) => address,
            None => {
                let request = DeployRequest::new(self.diamond.diamond_contract())
                    .with_args(vec![json!(owner), json!(cut_address)]);
                let deployed = self
                    .deploy_tracked(steps, names::DEPLOY_DIAMOND, &request, |info, deployed| {
                        info.diamond_address = Some(deployed.address.clone());
                        info.deployer_address = Some(owner.clone());
                    })
                    .await?;
                info!(
                    diamond = %self.diamond.name,
                    address = %deployed.address,
                    "Diamond shell deployed"
                );
                deployed.address
            }
        };

        self.reconcile(config, steps, &diamond_address).await?;
        store.load()
    }

    async fn run_upgrade(
        &self,
        config: &FacetsConfig,
        steps: &mut StepRegistry,
        diamond_address: &str,
    ) -> Result<DeployedDiamondInfo> {
        let store = self.info_store();
        self.preflight(config, steps, &store.load()?)?;
        self.begin_run(steps).await?;
        let outcome = self.reconcile(config, steps, diamond_address).await?;
        if outcome.is_empty() {
            info!(diamond = %self.diamond.name, "All facets current, nothing to upgrade");
        }
        store.load()
    }

    /// Configuration checks that must pass before any chain call.
    fn preflight(
        &self,
        config: &FacetsConfig,
        steps: &StepRegistry,
        info: &DeployedDiamondInfo,
    ) -> Result<()> {
        self.callbacks.validate(config)?;
        let has_work = self.planner(config, &self.info_store()).has_work(info)?;
        if has_work && steps.is_step_completed(names::DIAMOND_CUT) {
            return Err(DeployError::Config(format!(
                "deployment '{}' already applied its cut; run with a new deployment id",
                steps.deployment_id()
            )));
        }
        Ok(())
    }

    /// Fill the registry header and return the signer address.
    async fn begin_run(&self, steps: &mut StepRegistry) -> Result<String> {
        let signer = self
            .chain
            .signer_address()
            .await
            .map_err(|err| DeployError::chain("resolve signer", err))?;
        let network = self.diamond.require_network()?;
        let rpc_url = network
            .rpc_url
            .as_ref()
            .map(|url| url.to_string())
            .unwrap_or_default();
        steps.initialize_deployment(&self.diamond.network, network.chain_id, &rpc_url, &signer)?;
        Ok(signer)
    }

    /// Finish leftovers, plan, and apply the new batch.
    async fn reconcile(
        &self,
        config: &FacetsConfig,
        steps: &mut StepRegistry,
        diamond_address: &str,
    ) -> Result<PlanOutcome> {
        let store = self.info_store();
        let submitter = CutSubmitter {
            identity: &self.identity,
            chain: self.chain.as_ref(),
            store: &store,
            callbacks: &self.callbacks,
            protocol_init_facet: config.protocol_init_facet.as_deref(),
            steps_dir: &self.diamond.paths.steps_dir,
        };

        // A batch left by another deployment goes out on its own. One of
        // ours is extended by this pass and submitted once.
        let foreign_pending = store
            .load()?
            .pending_cuts
            .is_some_and(|pending| pending.deployment_id != steps.deployment_id());
        if foreign_pending {
            submitter.finish_pending(diamond_address, steps).await?;
        }

        let outcome = self.planner(config, &store).run(steps).await?;
        submitter.finish_pending(diamond_address, steps).await?;
        Ok(outcome)
    }

    fn planner<'a>(
        &'a self,
        config: &'a FacetsConfig,
        store: &'a DeploymentInfoStore,
    ) -> FacetCutPlanner<'a> {
        FacetCutPlanner {
            identity: &self.identity,
            config,
            policy: self.selector_policy(),
            cut_facet: self.diamond.cut_facet(),
            chain: self.chain.as_ref(),
            store,
        }
    }

    /// Deploy one contract under a step, persisting `record` before the step
    /// completes.
    async fn deploy_tracked<F>(
        &self,
        steps: &mut StepRegistry,
        step: &str,
        request: &DeployRequest,
        record: F,
    ) -> Result<DeployedContract>
    where
        F: FnOnce(&mut DeployedDiamondInfo, &DeployedContract),
    {
        let tracked = steps.begin_step(step)?;
        if !tracked {
            warn!(step, "Step already completed but its result is not recorded; redeploying");
        }
        let deployed = match self.chain.deploy_contract(request).await {
            Ok(deployed) => deployed,
            Err(err) => {
                if tracked {
                    steps.fail_step(step, &format!("{err:#}"))?;
                }
                return Err(DeployError::chain(format!("deploy {}", request.contract), err));
            }
        };

        self.info_store().modify(|info| record(info, &deployed))?;
        if tracked {
            steps.save_step(
                DeploymentStep::new(step, StepStatus::Completed)
                    .with_tx_hash(&deployed.tx_hash)
                    .with_contract_address(&deployed.address)
                    .with_gas(deployed.gas_used.clone(), deployed.gas_price.clone()),
            )?;
        }
        Ok(deployed)
    }

    fn require_diamond(&self) -> Result<String> {
        self.deployment_info()?
            .diamond_address
            .ok_or_else(|| DeployError::DiamondNotDeployed {
                diamond: self.diamond.name.clone(),
                network: self.diamond.network.clone(),
            })
    }

    /// Recorded info of a deployment that has nothing left to resume.
    fn finished_deployment(&self) -> Result<Option<DeployedDiamondInfo>> {
        let info = self.deployment_info()?;
        if info.diamond_address.is_none() || info.pending_cuts.is_some() {
            return Ok(None);
        }
        // Without a readable config there is nothing to resume against
        let Ok(config) = self.diamond.load_facets() else {
            return Ok(Some(info));
        };
        let steps = self.step_registry(&self.deployment_id(Operation::Deploy, &config))?;
        let registry = steps.registry();
        if !registry.steps.is_empty() && registry.completed_at.is_none() {
            return Ok(None);
        }
        Ok(Some(info))
    }
}

/// Stamp the registry with the run's result and hand the result back.
fn settle<T>(steps: &mut StepRegistry, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            steps.mark_deployment_complete()?;
            info!(deployment_id = %steps.deployment_id(), "Deployment complete");
            Ok(value)
        }
        Err(err) => {
            if let Err(mark_err) = steps.mark_deployment_failed(&err.to_string()) {
                warn!(error = %mark_err, "Failed to record deployment failure");
            }
            warn!(deployment_id = %steps.deployment_id(), error = %err, "Deployment failed");
            Err(err)
        }
    }
}
