//! Pure cut computation: versioning decisions and selector diffs.

use std::collections::BTreeMap;

use crate::config::{FacetConfig, FacetVersion, FacetsConfig};
use crate::deployment::DeployedFacetRecord;
use crate::error::{DeployError, Result};
use crate::types::{FacetCut, FacetCutAction, normalize_selector};

use super::selectors::{SelectorPolicy, SelectorRegistry};

/// Three disjoint selector sets between a facet's recorded and fresh selectors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorDiff {
    /// Recorded but dropped by the new code.
    pub removed: Vec<String>,
    /// Kept, now routed to the new facet address.
    pub replaced: Vec<String>,
    /// Not recorded before.
    pub added: Vec<String>,
}

impl SelectorDiff {
    pub fn compute(existing: &[String], fresh: &[String]) -> Self {
        let removed = existing
            .iter()
            .filter(|s| !fresh.contains(s))
            .cloned()
            .collect();
        let replaced = fresh
            .iter()
            .filter(|s| existing.contains(s))
            .cloned()
            .collect();
        let added = fresh
            .iter()
            .filter(|s| !existing.contains(s))
            .cloned()
            .collect();
        Self {
            removed,
            replaced,
            added,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.replaced.is_empty() && self.added.is_empty()
    }

    /// Cuts in Remove, Replace, Add order; `init_func` rides on Add/Replace only.
    pub fn into_cuts(
        self,
        facet: &str,
        facet_address: &str,
        init_func: Option<&str>,
    ) -> Vec<FacetCut> {
        let mut cuts = Vec::with_capacity(3);
        if !self.removed.is_empty() {
            cuts.push(FacetCut::remove(facet, self.removed));
        }
        for (action, selectors) in [
            (FacetCutAction::Replace, self.replaced),
            (FacetCutAction::Add, self.added),
        ] {
            if selectors.is_empty() {
                continue;
            }
            cuts.push(FacetCut {
                facet_address: facet_address.to_string(),
                action,
                function_selectors: selectors,
                name: facet.to_string(),
                init_func: init_func.map(str::to_string),
            });
        }
        cuts
    }
}

/// What to do with one configured facet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetDecision {
    /// Recorded version already at or beyond the target.
    Current { version: FacetVersion },
    Deploy {
        from: FacetVersion,
        to: FacetVersion,
        is_upgrade: bool,
    },
}

/// Decide whether `facet` needs a fresh deployment.
///
/// Fails when the target version restricts its upgrade origins and the
/// recorded version is not one of them.
pub fn decide(facet: &FacetConfig, record: Option<&DeployedFacetRecord>) -> Result<FacetDecision> {
    let deployed = record.map(|r| r.version).unwrap_or(FacetVersion::ZERO);
    let target = facet.target_version();
    if record.is_some() && target <= deployed {
        return Ok(FacetDecision::Current { version: deployed });
    }

    let is_upgrade = record.is_some();
    if is_upgrade {
        if let Some(spec) = facet.target_spec() {
            if !spec.allows_upgrade_from(deployed) {
                return Err(DeployError::UpgradePathNotAllowed {
                    facet: facet.name.clone(),
                    from: deployed.to_string(),
                    to: target.to_string(),
                    allowed: spec.from_versions.iter().map(|v| v.to_string()).collect(),
                });
            }
        }
    }
    Ok(FacetDecision::Deploy {
        from: deployed,
        to: target,
        is_upgrade,
    })
}

/// Inputs for planning one freshly deployed facet.
#[derive(Debug)]
pub struct FacetPlanInput<'a> {
    pub facet: &'a FacetConfig,
    pub record: Option<&'a DeployedFacetRecord>,
    pub facet_address: &'a str,
    /// Selectors introspected from the new contract, before filters.
    pub introspected: &'a [String],
    /// Encoded selector of the init function, if the version has one.
    pub init_selector: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetPlan {
    pub facet: String,
    pub from: FacetVersion,
    pub to: FacetVersion,
    /// Filtered selector list that becomes the facet's new record.
    pub selectors: Vec<String>,
    pub cuts: Vec<FacetCut>,
}

/// Diff one facet against its record and update the global registry.
pub fn plan_facet(
    input: FacetPlanInput<'_>,
    registry: &mut SelectorRegistry,
    policy: SelectorPolicy,
) -> Result<FacetPlan> {
    let facet = input.facet;
    let mut normalized: Vec<String> = Vec::with_capacity(input.introspected.len());
    for raw in input.introspected {
        let selector = normalize_selector(raw).ok_or_else(|| {
            DeployError::invalid_facet(&facet.name, format!("'{raw}' is not a 4-byte selector"))
        })?;
        if !normalized.contains(&selector) {
            normalized.push(selector);
        }
    }
    let selectors = match facet.target_spec() {
        Some(spec) => spec.filter_selectors(&normalized),
        None => normalized,
    };

    let existing: &[String] = input
        .record
        .map(|r| r.func_selectors.as_slice())
        .unwrap_or(&[]);
    let diff = SelectorDiff::compute(existing, &selectors);
    registry.check_additions(&facet.name, &diff.added, policy)?;

    registry.release(&facet.name);
    registry.register(&facet.name, &selectors);

    let from = input.record.map(|r| r.version).unwrap_or(FacetVersion::ZERO);
    Ok(FacetPlan {
        facet: facet.name.clone(),
        from,
        to: facet.target_version(),
        cuts: diff.into_cuts(&facet.name, input.facet_address, input.init_selector),
        selectors,
    })
}

/// Remove cuts for recorded facets no longer configured.
///
/// Facets listed in `keep` (the cut facet) are never removed. Their selectors
/// are released from `registry`.
pub fn removed_facet_cuts(
    config: &FacetsConfig,
    deployed: &BTreeMap<String, DeployedFacetRecord>,
    keep: &[&str],
    registry: &mut SelectorRegistry,
) -> Vec<FacetCut> {
    let mut cuts = Vec::new();
    for (name, record) in deployed {
        if config.facet(name).is_some() || keep.contains(&name.as_str()) {
            continue;
        }
        registry.release(name);
        if !record.func_selectors.is_empty() {
            cuts.push(FacetCut::remove(name, record.func_selectors.clone()));
        }
    }
    cuts
}

/// Supplies fresh facet deployments to [`compute_cuts`].
pub trait FacetSource {
    /// Address and selector list of a new deployment of `facet`.
    fn introspect(&self, facet: &FacetConfig) -> Result<(String, Vec<String>)>;

    fn encode_selector(&self, signature: &str) -> Result<String>;
}

/// Full plan for one diamond.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CutPlan {
    /// Remove cuts of facets dropped from configuration.
    pub removals: Vec<FacetCut>,
    pub facets: Vec<FacetPlan>,
    /// Facets already current, with their recorded version.
    pub current: Vec<(String, FacetVersion)>,
}

impl CutPlan {
    /// Every cut, removals of dropped facets first.
    pub fn cuts(&self) -> Vec<FacetCut> {
        self.removals
            .iter()
            .chain(self.facets.iter().flat_map(|f| f.cuts.iter()))
            .cloned()
            .collect()
    }
}

/// Compute all cuts needed to reconcile `deployed` with `config`.
pub fn compute_cuts(
    config: &FacetsConfig,
    deployed: &BTreeMap<String, DeployedFacetRecord>,
    keep: &[&str],
    policy: SelectorPolicy,
    source: &dyn FacetSource,
) -> Result<CutPlan> {
    let mut registry = SelectorRegistry::from_records(deployed);
    let mut plan = CutPlan {
        removals: removed_facet_cuts(config, deployed, keep, &mut registry),
        ..Default::default()
    };

    for facet in config.ordered() {
        let record = deployed.get(&facet.name);
        let is_upgrade = match decide(facet, record)? {
            FacetDecision::Current { version } => {
                plan.current.push((facet.name.clone(), version));
                continue;
            }
            FacetDecision::Deploy { is_upgrade, .. } => is_upgrade,
        };

        let (address, introspected) = source.introspect(facet)?;
        let init_selector = match facet.target_spec().and_then(|s| s.init_signature(is_upgrade)) {
            Some(signature) => Some(source.encode_selector(signature)?),
            None => None,
        };
        plan.facets.push(plan_facet(
            FacetPlanInput {
                facet,
                record,
                facet_address: &address,
                introspected: &introspected,
                init_selector: init_selector.as_deref(),
            },
            &mut registry,
            policy,
        )?);
    }
    Ok(plan)
}
