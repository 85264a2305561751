//! Compiled contract artifacts, used to preview cuts without a chain.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::config::FacetConfig;
use crate::error::{DeployError, Result};
use crate::fs::read_json;
use crate::planner::FacetSource;
use crate::types::normalize_selector;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactFile {
    #[serde(default)]
    method_identifiers: Option<serde_json::Map<String, Value>>,
}

/// Function signatures and selectors of one compiled contract, in artifact order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifact {
    pub contract: String,
    pub methods: Vec<(String, String)>,
}

impl Artifact {
    pub fn selectors(&self) -> Vec<String> {
        self.methods.iter().map(|(_, selector)| selector.clone()).collect()
    }

    pub fn selector_of(&self, signature: &str) -> Option<&str> {
        self.methods
            .iter()
            .find(|(sig, _)| sig == signature)
            .map(|(_, selector)| selector.as_str())
    }
}

/// Location of a contract's artifact: `<artifacts>/<Name>.sol/<Name>.json`.
pub fn artifact_path(artifacts_dir: &Path, contract: &str) -> PathBuf {
    artifacts_dir
        .join(format!("{contract}.sol"))
        .join(format!("{contract}.json"))
}

pub fn load_artifact(artifacts_dir: &Path, contract: &str) -> Result<Artifact> {
    let path = artifact_path(artifacts_dir, contract);
    let file: ArtifactFile = read_json(&path)?.ok_or_else(|| {
        DeployError::Config(format!(
            "artifact for '{contract}' not found at {}; compile the contracts first",
            path.display()
        ))
    })?;
    let identifiers = file.method_identifiers.ok_or_else(|| DeployError::CorruptState {
        path: path.clone(),
        reason: "artifact has no methodIdentifiers".to_string(),
    })?;

    let mut methods = Vec::with_capacity(identifiers.len());
    for (signature, raw) in identifiers {
        let selector = raw
            .as_str()
            .and_then(normalize_selector)
            .ok_or_else(|| DeployError::CorruptState {
                path: path.clone(),
                reason: format!("invalid selector for {signature}: {raw}"),
            })?;
        methods.push((signature, selector));
    }
    Ok(Artifact {
        contract: contract.to_string(),
        methods,
    })
}

/// Facet source that reads a facet's artifact the first time it is planned.
///
/// Facets that are already current are never introspected, so they need no
/// compiled artifact.
#[derive(Debug, Clone, Default)]
pub struct ArtifactSource {
    artifacts_dir: PathBuf,
    loaded: RefCell<BTreeMap<String, Artifact>>,
}

impl ArtifactSource {
    pub fn new(artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
            loaded: RefCell::new(BTreeMap::new()),
        }
    }

    /// Placeholder address shown for a facet that has not been deployed yet.
    pub fn placeholder_address(facet: &str) -> String {
        format!("<new {facet}>")
    }

    fn artifact(&self, contract: &str) -> Result<Artifact> {
        if let Some(artifact) = self.loaded.borrow().get(contract) {
            return Ok(artifact.clone());
        }
        let artifact = load_artifact(&self.artifacts_dir, contract)?;
        self.loaded
            .borrow_mut()
            .insert(contract.to_string(), artifact.clone());
        Ok(artifact)
    }
}

impl FacetSource for ArtifactSource {
    fn introspect(&self, facet: &FacetConfig) -> Result<(String, Vec<String>)> {
        let artifact = self.artifact(&facet.name)?;
        Ok((Self::placeholder_address(&facet.name), artifact.selectors()))
    }

    /// Looks through the artifacts introspected so far.
    fn encode_selector(&self, signature: &str) -> Result<String> {
        self.loaded
            .borrow()
            .values()
            .find_map(|artifact| artifact.selector_of(signature))
            .map(str::to_string)
            .ok_or_else(|| {
                DeployError::Config(format!("no compiled contract declares {signature}"))
            })
    }
}
