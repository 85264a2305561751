//! Project-level `diamond.toml`: networks, path overrides and per-diamond settings.
//!
//! ```toml
//! [paths]
//! deployments = "diamonds"
//! artifacts = "out"
//!
//! [networks.sepolia]
//! chain_id = 11155111
//! rpc_url = "https://rpc.sepolia.org"
//!
//! [diamonds.ProxyDiamond]
//! config_file = "config/proxy.config.json"
//! selector_policy = "strict"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};
use crate::planner::SelectorPolicy;

pub const PROJECT_CONFIG_FILE: &str = "diamond.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(default)]
    pub paths: PathOverrides,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
    #[serde(default)]
    pub diamonds: BTreeMap<String, DiamondSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathOverrides {
    pub deployments: Option<PathBuf>,
    pub contracts: Option<PathBuf>,
    pub artifacts: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub rpc_url: Option<url::Url>,
    /// Dev or fork network where impersonation is available.
    #[serde(default)]
    pub dev: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiamondSettings {
    pub config_file: Option<PathBuf>,
    pub deployments_path: Option<PathBuf>,
    pub callbacks_path: Option<PathBuf>,
    pub deployed_data_file: Option<PathBuf>,
    pub selector_policy: Option<SelectorPolicy>,
    /// Contract deployed first; it owns the `diamondCut` selector.
    pub cut_facet: Option<String>,
    /// Contract name of the diamond shell.
    pub diamond_contract: Option<String>,
}

impl ProjectConfig {
    /// Load `diamond.toml` from `project_root`, or an empty config if absent.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(PROJECT_CONFIG_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_toml_str(&content).map_err(|err| match err {
                DeployError::Config(reason) => {
                    DeployError::Config(format!("{}: {reason}", path.display()))
                }
                other => other,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(DeployError::io(path, err)),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|err| enhance_toml_error(err, content))
    }

    pub fn network(&self, name: &str) -> Option<&NetworkConfig> {
        self.networks
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, network)| network)
    }

    pub fn diamond(&self, name: &str) -> Option<&DiamondSettings> {
        self.diamonds.get(name)
    }
}

/// Attach the offending lines to a TOML parse error.
fn enhance_toml_error(error: toml::de::Error, content: &str) -> DeployError {
    let message = error.message().to_string();
    match error.span() {
        Some(span) => {
            let line_num = content[..span.start.min(content.len())].matches('\n').count() + 1;
            DeployError::Config(format!(
                "TOML parsing error at line {}:\n{}\n\nError: {}",
                line_num,
                line_context(content, line_num),
                message
            ))
        }
        None => DeployError::Config(format!("TOML parsing error: {message}")),
    }
}

fn line_context(content: &str, line_num: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = line_num.saturating_sub(2);
    let end = (line_num + 1).min(lines.len());

    lines[start.min(end)..end]
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let num = start + i + 1;
            let marker = if num == line_num { ">>>" } else { "   " };
            format!("{} {:4} | {}", marker, num, line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
