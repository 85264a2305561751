//! Post-deploy callbacks run after a facet's cut is applied.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::chain::ChainAdapter;
use crate::config::{FacetVersion, FacetsConfig};
use crate::error::{DeployError, Result};
use crate::types::DiamondIdentity;

/// What a callback gets to work with.
pub struct CallbackContext<'a> {
    pub identity: &'a DiamondIdentity,
    pub diamond_address: &'a str,
    pub facet: &'a str,
    pub version: FacetVersion,
    pub chain: &'a dyn ChainAdapter,
}

#[async_trait]
pub trait PostDeployCallback: Send + Sync {
    async fn run(&self, ctx: &CallbackContext<'_>) -> anyhow::Result<()>;
}

/// Callbacks available to facet configurations, by name.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    callbacks: BTreeMap<String, Arc<dyn PostDeployCallback>>,
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("callbacks", &self.callbacks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, callback: Arc<dyn PostDeployCallback>) {
        self.callbacks.insert(name.into(), callback);
    }

    pub fn with(mut self, name: impl Into<String>, callback: Arc<dyn PostDeployCallback>) -> Self {
        self.register(name, callback);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PostDeployCallback>> {
        self.callbacks.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.callbacks.keys().map(String::as_str)
    }

    /// Check that every callback named by a target version is registered.
    pub fn validate(&self, config: &FacetsConfig) -> Result<()> {
        for facet in &config.facets {
            let Some(spec) = facet.target_spec() else {
                continue;
            };
            for name in &spec.callback {
                if !self.callbacks.contains_key(name) {
                    return Err(DeployError::UnknownCallback {
                        facet: facet.name.clone(),
                        name: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
