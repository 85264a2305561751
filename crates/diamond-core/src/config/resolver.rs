//! Resolve a diamond's file layout for one network.
//!
//! Resolution order: a `[diamonds.<Name>]` entry in `diamond.toml`, an
//! explicit config path supplied by the caller, the conventional location
//! `<deployments>/<Name>/<name>.config.json` when it exists, then defaults
//! (the same conventional layout).

use std::path::{Path, PathBuf};

use crate::error::{DeployError, Result};
use crate::planner::SelectorPolicy;

use super::facets::FacetsConfig;
use super::project::{DiamondSettings, NetworkConfig, ProjectConfig};

pub const DEFAULT_DEPLOYMENTS_DIR: &str = "diamonds";
pub const DEFAULT_CONTRACTS_DIR: &str = "contracts";
pub const DEFAULT_ARTIFACTS_DIR: &str = "out";
pub const DEFAULT_CUT_FACET: &str = "DiamondCutFacet";

/// Where a diamond's configuration was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    PluginConfig,
    ExplicitPath,
    Conventional,
    Default,
}

/// File-system layout of one diamond on one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiamondPaths {
    pub deployments_path: PathBuf,
    pub contracts_path: PathBuf,
    pub artifacts_path: PathBuf,
    pub callbacks_path: PathBuf,
    pub config_file_path: PathBuf,
    pub deployed_diamond_data_file_path: PathBuf,
    /// Directory holding one step registry per deployment id.
    pub steps_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ResolvedDiamond {
    pub name: String,
    pub network: String,
    pub source: ConfigSource,
    pub paths: DiamondPaths,
    pub settings: DiamondSettings,
    pub network_config: Option<NetworkConfig>,
}

impl ResolvedDiamond {
    pub fn load_facets(&self) -> Result<FacetsConfig> {
        FacetsConfig::load(&self.paths.config_file_path)
    }

    pub fn selector_policy(&self) -> SelectorPolicy {
        self.settings.selector_policy.unwrap_or_default()
    }

    pub fn cut_facet(&self) -> &str {
        self.settings
            .cut_facet
            .as_deref()
            .unwrap_or(DEFAULT_CUT_FACET)
    }

    pub fn diamond_contract(&self) -> &str {
        self.settings
            .diamond_contract
            .as_deref()
            .unwrap_or(&self.name)
    }

    /// Network settings; required for anything that talks to a chain.
    pub fn require_network(&self) -> Result<&NetworkConfig> {
        self.network_config.as_ref().ok_or_else(|| {
            DeployError::Config(format!(
                "network '{}' is not declared in diamond.toml",
                self.network
            ))
        })
    }
}

#[derive(Debug, Clone)]
pub struct ConfigResolver {
    project_root: PathBuf,
    project: ProjectConfig,
    explicit_config: Option<PathBuf>,
}

impl ConfigResolver {
    /// Create a resolver, reading `diamond.toml` from the project root if present.
    pub fn new(project_root: impl Into<PathBuf>) -> Result<Self> {
        let project_root = project_root.into();
        let project = ProjectConfig::load(&project_root)?;
        Ok(Self::with_project_config(project_root, project))
    }

    pub fn with_project_config(project_root: impl Into<PathBuf>, project: ProjectConfig) -> Self {
        Self {
            project_root: project_root.into(),
            project,
            explicit_config: None,
        }
    }

    /// Use `path` as the facet config file unless `diamond.toml` names one.
    pub fn with_explicit_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_config = Some(path.into());
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn project_config(&self) -> &ProjectConfig {
        &self.project
    }

    pub fn resolve(&self, diamond_name: &str, network: &str) -> Result<ResolvedDiamond> {
        let diamond_name = diamond_name.trim();
        if diamond_name.is_empty() {
            return Err(DeployError::Config("diamond name cannot be empty".to_string()));
        }
        let network = network.trim().to_lowercase();
        if network.is_empty() {
            return Err(DeployError::Config("network name cannot be empty".to_string()));
        }

        let overrides = &self.project.paths;
        let deployments_path = self.anchor(
            overrides
                .deployments
                .as_deref()
                .unwrap_or(Path::new(DEFAULT_DEPLOYMENTS_DIR)),
        );
        let contracts_path = self.anchor(
            overrides
                .contracts
                .as_deref()
                .unwrap_or(Path::new(DEFAULT_CONTRACTS_DIR)),
        );
        let artifacts_path = self.anchor(
            overrides
                .artifacts
                .as_deref()
                .unwrap_or(Path::new(DEFAULT_ARTIFACTS_DIR)),
        );

        let plugin = self.project.diamond(diamond_name);
        let settings = plugin.cloned().unwrap_or_default();
        let file_stem = diamond_name.to_lowercase();
        let conventional_dir = deployments_path.join(diamond_name);
        let conventional_config = conventional_dir.join(format!("{file_stem}.config.json"));

        let explicit = self.explicit_config.as_ref().map(|p| self.anchor(p));
        let plugin_config = settings.config_file.as_deref().map(|p| self.anchor(p));

        let (source, config_file_path) = match (plugin, plugin_config, explicit) {
            (Some(_), Some(path), _) => (ConfigSource::PluginConfig, path),
            (Some(_), None, Some(path)) => (ConfigSource::PluginConfig, path),
            (Some(_), None, None) => (ConfigSource::PluginConfig, conventional_config),
            (None, _, Some(path)) => (ConfigSource::ExplicitPath, path),
            (None, _, None) if conventional_config.exists() => {
                (ConfigSource::Conventional, conventional_config)
            }
            (None, _, None) => (ConfigSource::Default, conventional_config),
        };

        // An explicit config file anchors the rest of the diamond's layout
        let diamond_dir = match (settings.deployments_path.as_deref(), source) {
            (Some(dir), _) => self.anchor(dir),
            (None, ConfigSource::ExplicitPath) => config_file_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| conventional_dir.clone()),
            (None, _) => conventional_dir,
        };

        let callbacks_path = settings
            .callbacks_path
            .as_deref()
            .map(|p| self.anchor(p))
            .unwrap_or_else(|| diamond_dir.join("callbacks"));
        let deployed_diamond_data_file_path = settings
            .deployed_data_file
            .as_deref()
            .map(|p| self.anchor(p))
            .unwrap_or_else(|| {
                diamond_dir
                    .join("deployments")
                    .join(format!("{file_stem}-{network}.json"))
            });
        // Deployment ids repeat across networks, so registries are kept apart
        let steps_dir = diamond_dir.join("deployments").join("steps").join(&network);

        tracing::debug!(
            diamond = diamond_name,
            network = %network,
            source = ?source,
            config = %config_file_path.display(),
            "Resolved diamond layout"
        );

        Ok(ResolvedDiamond {
            name: diamond_name.to_string(),
            network_config: self.project.network(&network).cloned(),
            network,
            source,
            paths: DiamondPaths {
                deployments_path,
                contracts_path,
                artifacts_path,
                callbacks_path,
                config_file_path,
                deployed_diamond_data_file_path,
                steps_dir,
            },
            settings,
        })
    }

    fn anchor(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }
}
