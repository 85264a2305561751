//! Shared domain types: diamond identity, selectors and facet cuts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Address used for `Remove` cuts and for a cut without an initializer.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Identity of one diamond on one network.
///
/// Fields are normalized to lowercase so that `Sepolia/ProxyDiamond` and
/// `sepolia/proxydiamond` address the same coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiamondIdentity {
    pub network_name: String,
    pub chain_id: u64,
    pub diamond_name: String,
}

impl DiamondIdentity {
    pub fn new(network_name: &str, chain_id: u64, diamond_name: &str) -> Self {
        Self {
            network_name: network_name.trim().to_lowercase(),
            chain_id,
            diamond_name: diamond_name.trim().to_lowercase(),
        }
    }

    /// Stable string key, e.g. `sepolia-11155111-proxydiamond`.
    pub fn key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.network_name, self.chain_id, self.diamond_name
        )
    }
}

impl fmt::Display for DiamondIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Normalize a 4-byte selector to lowercase `0x`-prefixed hex.
///
/// Returns `None` for anything that is not exactly four bytes of hex.
pub fn normalize_selector(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if hex.len() != 8 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{}", hex.to_lowercase()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FacetCutAction {
    Add,
    Replace,
    Remove,
}

impl FacetCutAction {
    /// Numeric value used by the `IDiamondCut.FacetCutAction` enum.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Add => 0,
            Self::Replace => 1,
            Self::Remove => 2,
        }
    }
}

impl fmt::Display for FacetCutAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Add => "Add",
            Self::Replace => "Replace",
            Self::Remove => "Remove",
        };
        f.write_str(label)
    }
}

/// A single instruction of a diamond cut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacetCut {
    pub facet_address: String,
    pub action: FacetCutAction,
    pub function_selectors: Vec<String>,
    pub name: String,
    /// Selector of the function to call once after the cut.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_func: Option<String>,
}

impl FacetCut {
    pub fn remove(name: &str, function_selectors: Vec<String>) -> Self {
        Self {
            facet_address: ZERO_ADDRESS.to_string(),
            action: FacetCutAction::Remove,
            function_selectors,
            name: name.to_string(),
            init_func: None,
        }
    }
}
