//! Applying the pending batch: the diamond cut, init calls and callbacks.

use std::path::Path;

use tracing::{debug, info};

use crate::callbacks::{CallbackContext, CallbackRegistry};
use crate::chain::{ChainAdapter, DIAMOND_CUT_INTERFACE, TxReceipt};
use crate::deployment::{DeploymentInfoStore, PendingCuts};
use crate::error::{DeployError, Result};
use crate::steps::{DeploymentStep, StepRegistry, StepStatus, names};
use crate::types::{DiamondIdentity, FacetCut, ZERO_ADDRESS};

/// Initializer passed with an empty cut call.
const EMPTY_CALLDATA: &str = "0x";

/// Result of applying one pending batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CutOutcome {
    pub deployment_id: String,
    /// `None` when the cut was already applied by an earlier run or the batch had no cuts.
    pub tx_hash: Option<String>,
    pub cuts: usize,
    pub init_calls: usize,
    pub callbacks: usize,
}

/// Split the batch's initializers into the cut initializer and post-cut calls.
///
/// The protocol init facet's initializer travels with the cut. Every other
/// facet's initializer is called once on the diamond afterwards.
pub fn split_initializers<'c>(
    cuts: &'c [FacetCut],
    protocol_init_facet: Option<&str>,
) -> (Option<(&'c str, &'c str)>, Vec<(&'c str, &'c str)>) {
    let mut cut_init = None;
    let mut calls: Vec<(&str, &str)> = Vec::new();
    for cut in cuts {
        let Some(init) = cut.init_func.as_deref() else {
            continue;
        };
        if Some(cut.name.as_str()) == protocol_init_facet {
            if cut_init.is_none() {
                cut_init = Some((cut.facet_address.as_str(), init));
            }
        } else if !calls.iter().any(|(facet, _)| *facet == cut.name) {
            calls.push((cut.name.as_str(), init));
        }
    }
    (cut_init, calls)
}

pub struct CutSubmitter<'a> {
    pub identity: &'a DiamondIdentity,
    pub chain: &'a dyn ChainAdapter,
    pub store: &'a DeploymentInfoStore,
    pub callbacks: &'a CallbackRegistry,
    pub protocol_init_facet: Option<&'a str>,
    /// Where registries of other deployment ids are found.
    pub steps_dir: &'a Path,
}

impl CutSubmitter<'_> {
    /// Apply whatever pending batch the deployment-info file holds.
    ///
    /// Each part of the batch is tracked as a step of the run that queued it;
    /// completed parts are skipped, so calling this again after a failure
    /// resumes where the previous attempt stopped.
    pub async fn finish_pending(
        &self,
        diamond_address: &str,
        steps: &mut StepRegistry,
    ) -> Result<Option<CutOutcome>> {
        let Some(pending) = self.store.load()?.pending_cuts else {
            return Ok(None);
        };

        let mut foreign;
        let steps = if pending.deployment_id == steps.deployment_id() {
            steps
        } else {
            debug!(
                deployment_id = %pending.deployment_id,
                "Resuming pending batch of an earlier deployment"
            );
            foreign = StepRegistry::open(
                self.steps_dir,
                &steps.registry().diamond_name,
                &pending.deployment_id,
            )?;
            &mut foreign
        };

        let outcome = self.apply(&pending, diamond_address, steps).await?;
        self.store.modify(|info| info.pending_cuts = None)?;
        info!(
            diamond = %self.identity.diamond_name,
            deployment_id = %outcome.deployment_id,
            cuts = outcome.cuts,
            init_calls = outcome.init_calls,
            callbacks = outcome.callbacks,
            "Pending batch applied"
        );
        Ok(Some(outcome))
    }

    async fn apply(
        &self,
        pending: &PendingCuts,
        diamond_address: &str,
        steps: &mut StepRegistry,
    ) -> Result<CutOutcome> {
        let (cut_init, init_calls) = split_initializers(&pending.cuts, self.protocol_init_facet);
        let mut outcome = CutOutcome {
            deployment_id: pending.deployment_id.clone(),
            cuts: pending.cuts.len(),
            ..Default::default()
        };

        if !pending.cuts.is_empty() && steps.begin_step(names::DIAMOND_CUT)? {
            let (init_address, init_calldata) = cut_init.unwrap_or((ZERO_ADDRESS, EMPTY_CALLDATA));
            match self
                .submit_cut(diamond_address, &pending.cuts, init_address, init_calldata)
                .await
            {
                Ok(receipt) => {
                    steps.save_step(
                        DeploymentStep::new(names::DIAMOND_CUT, StepStatus::Completed)
                            .with_tx_hash(&receipt.tx_hash)
                            .with_contract_address(diamond_address)
                            .with_gas(receipt.gas_used.clone(), receipt.gas_price.clone()),
                    )?;
                    outcome.tx_hash = Some(receipt.tx_hash);
                }
                Err(err) => {
                    steps.fail_step(names::DIAMOND_CUT, &err.to_string())?;
                    return Err(err);
                }
            }
        }

        for (facet, selector) in init_calls {
            let step = names::init(facet);
            if !steps.begin_step(&step)? {
                continue;
            }
            let result = self
                .chain
                .call_contract(diamond_address, selector, &[])
                .await
                .map_err(|err| DeployError::chain(format!("init {facet}"), err))
                .and_then(|receipt| {
                    if receipt.success {
                        Ok(receipt)
                    } else {
                        Err(DeployError::TransactionReverted {
                            operation: format!("init {facet}"),
                            tx_hash: receipt.tx_hash,
                        })
                    }
                });
            match result {
                Ok(receipt) => {
                    steps.save_step(
                        DeploymentStep::new(&step, StepStatus::Completed)
                            .with_tx_hash(&receipt.tx_hash)
                            .with_gas(receipt.gas_used, receipt.gas_price),
                    )?;
                    debug!(facet, selector, "Initializer called");
                    outcome.init_calls += 1;
                }
                Err(err) => {
                    steps.fail_step(&step, &err.to_string())?;
                    return Err(err);
                }
            }
        }

        for pending_callback in &pending.callbacks {
            let facet = pending_callback.facet.as_str();
            let name = pending_callback.callback.as_str();
            let step = names::callback(facet, name);
            if steps.is_step_completed(&step) {
                continue;
            }
            let callback = self.callbacks.get(name).ok_or_else(|| DeployError::UnknownCallback {
                facet: facet.to_string(),
                name: name.to_string(),
            })?;
            if !steps.begin_step(&step)? {
                continue;
            }

            let ctx = CallbackContext {
                identity: self.identity,
                diamond_address,
                facet,
                version: pending_callback.version,
                chain: self.chain,
            };
            match callback.run(&ctx).await {
                Ok(()) => {
                    steps.save_step(DeploymentStep::new(&step, StepStatus::Completed))?;
                    debug!(facet, callback = name, "Callback finished");
                    outcome.callbacks += 1;
                }
                Err(err) => {
                    steps.fail_step(&step, &format!("{err:#}"))?;
                    return Err(DeployError::Callback {
                        facet: facet.to_string(),
                        name: name.to_string(),
                        source: err,
                    });
                }
            }
        }
        Ok(outcome)
    }

    async fn submit_cut(
        &self,
        diamond_address: &str,
        cuts: &[FacetCut],
        init_address: &str,
        init_calldata: &str,
    ) -> Result<TxReceipt> {
        let handle = self
            .chain
            .get_contract_at(DIAMOND_CUT_INTERFACE, diamond_address)
            .await
            .map_err(|err| DeployError::chain("resolve diamond cut interface", err))?;
        info!(
            diamond = %self.identity.diamond_name,
            address = diamond_address,
            cuts = cuts.len(),
            init_address,
            "Submitting diamond cut"
        );
        let receipt = self
            .chain
            .submit_cut(&handle, cuts, init_address, init_calldata)
            .await
            .map_err(|err| DeployError::chain("diamond cut", err))?;
        if !receipt.success {
            return Err(DeployError::CutReverted {
                tx_hash: receipt.tx_hash,
            });
        }
        Ok(receipt)
    }
}
