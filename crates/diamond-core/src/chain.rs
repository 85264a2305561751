//! Chain adapter seam.
//!
//! The core never builds or signs transactions itself. Hosts implement
//! [`ChainAdapter`] on top of their RPC client; every call is an await point and
//! the adapter owns timeouts and retries.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::FacetCut;

/// Interface used to submit diamond cuts.
pub const DIAMOND_CUT_INTERFACE: &str = "IDiamondCut";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub contract: String,
    #[serde(default)]
    pub constructor_args: Vec<Value>,
    /// Library name to deployed address, for linking.
    #[serde(default)]
    pub libraries: BTreeMap<String, String>,
}

impl DeployRequest {
    pub fn new(contract: impl Into<String>) -> Self {
        Self {
            contract: contract.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.constructor_args = args;
        self
    }

    pub fn with_libraries(mut self, libraries: BTreeMap<String, String>) -> Self {
        self.libraries = libraries;
        self
    }
}

/// Result of a confirmed contract creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedContract {
    pub address: String,
    pub tx_hash: String,
    /// Function selectors of the deployed interface (constructor and events excluded).
    pub selectors: Vec<String>,
    #[serde(default)]
    pub gas_used: Option<String>,
    #[serde(default)]
    pub gas_price: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_hash: String,
    /// `false` when the transaction was mined but reverted.
    pub success: bool,
    #[serde(default)]
    pub gas_used: Option<String>,
    #[serde(default)]
    pub gas_price: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractHandle {
    pub interface: String,
    pub address: String,
}

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Address transactions are sent from.
    async fn signer_address(&self) -> anyhow::Result<String>;

    /// Deploy a contract and wait for its receipt.
    async fn deploy_contract(&self, request: &DeployRequest) -> anyhow::Result<DeployedContract>;

    /// Send a transaction to `address`. `method` is a function signature or a
    /// `0x`-prefixed 4-byte selector.
    async fn call_contract(
        &self,
        address: &str,
        method: &str,
        args: &[Value],
    ) -> anyhow::Result<TxReceipt>;

    async fn get_contract_at(&self, interface: &str, address: &str)
    -> anyhow::Result<ContractHandle>;

    /// Submit one `diamondCut(cuts, initAddress, initCalldata)` transaction.
    async fn submit_cut(
        &self,
        diamond: &ContractHandle,
        cuts: &[FacetCut],
        init_address: &str,
        init_calldata: &str,
    ) -> anyhow::Result<TxReceipt>;

    /// 4-byte selector of a function signature such as `initialize(uint256)`.
    fn encode_selector(&self, signature: &str) -> anyhow::Result<String>;

    /// Impersonate `address` and fund it. Only dev and fork networks support this.
    async fn impersonate_and_fund(&self, address: &str) -> anyhow::Result<()> {
        anyhow::bail!("impersonating {address} is not supported on this network")
    }
}
