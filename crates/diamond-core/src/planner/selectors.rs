//! Global selector registry and the collision policy applied to it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::deployment::DeployedFacetRecord;
use crate::error::{DeployError, Result};

/// How newly added selectors are checked against selectors owned by other facets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorPolicy {
    /// A selector already bound to another facet is a collision error.
    #[default]
    Strict,
    /// No cross-facet check; the diamond itself rejects duplicate `Add`s.
    Permissive,
}

impl std::str::FromStr for SelectorPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "permissive" => Ok(Self::Permissive),
            other => Err(format!(
                "unknown selector policy '{other}' (expected strict or permissive)"
            )),
        }
    }
}

/// Every selector currently bound to a facet of the diamond, with its owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorRegistry {
    owners: BTreeMap<String, String>,
}

impl SelectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: &BTreeMap<String, DeployedFacetRecord>) -> Self {
        let mut registry = Self::new();
        for (facet, record) in records {
            registry.register(facet, &record.func_selectors);
        }
        registry
    }

    pub fn register(&mut self, facet: &str, selectors: &[String]) {
        for selector in selectors {
            self.owners.insert(selector.clone(), facet.to_string());
        }
    }

    /// Drop every selector owned by `facet`.
    pub fn release(&mut self, facet: &str) {
        self.owners.retain(|_, owner| owner != facet);
    }

    pub fn owner(&self, selector: &str) -> Option<&str> {
        self.owners.get(selector).map(String::as_str)
    }

    pub fn contains(&self, selector: &str) -> bool {
        self.owners.contains_key(selector)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Reject `added` selectors already bound to a different facet.
    pub fn check_additions(
        &self,
        facet: &str,
        added: &[String],
        policy: SelectorPolicy,
    ) -> Result<()> {
        if policy == SelectorPolicy::Permissive {
            return Ok(());
        }
        for selector in added {
            if let Some(owner) = self.owner(selector) {
                if owner != facet {
                    return Err(DeployError::SelectorCollision {
                        selector: selector.clone(),
                        facet: facet.to_string(),
                        owner: owner.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
