//! Shared fixtures: a recording chain adapter and a temp project layout.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::bail;
use async_trait::async_trait;
use diamond_core::chain::{
    ChainAdapter, ContractHandle, DeployRequest, DeployedContract, TxReceipt,
};
use diamond_core::config::{ConfigResolver, ResolvedDiamond};
use diamond_core::coordinator::DeploymentCoordinator;
use diamond_core::types::FacetCut;
use serde_json::Value;
use tempfile::TempDir;

pub const SIGNER: &str = "0x00000000000000000000000000000000000000de";
pub const CUT_SELECTOR: &str = "0x1f931c1c";

pub const PROJECT_TOML: &str = r#"
[networks.hardhat]
chain_id = 31337
rpc_url = "http://127.0.0.1:8545"
dev = true

[networks.sepolia]
chain_id = 11155111
"#;

#[derive(Debug, Clone, PartialEq)]
pub enum ChainCall {
    Deploy {
        contract: String,
        args: Vec<Value>,
        libraries: BTreeMap<String, String>,
    },
    Call {
        address: String,
        method: String,
    },
    Cut {
        address: String,
        cuts: Vec<FacetCut>,
        init_address: String,
        init_calldata: String,
    },
    Impersonate {
        address: String,
    },
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    calls: Vec<ChainCall>,
    selectors: HashMap<String, Vec<String>>,
    reverting_cuts: usize,
    failing_deploys: HashMap<String, usize>,
}

/// Chain adapter that hands out sequential addresses and records every call.
#[derive(Debug, Clone, Default)]
pub struct MockChain {
    state: Arc<Mutex<MockState>>,
}

impl MockChain {
    pub fn new() -> Self {
        let chain = Self::default();
        chain.set_selectors("DiamondCutFacet", &[CUT_SELECTOR]);
        chain
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state lock")
    }

    pub fn set_selectors(&self, contract: &str, selectors: &[&str]) {
        self.state().selectors.insert(
            contract.to_string(),
            selectors.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Make the next `count` cuts revert.
    pub fn revert_cuts(&self, count: usize) {
        self.state().reverting_cuts = count;
    }

    /// Make the next `count` deployments of `contract` fail.
    pub fn fail_deploys(&self, contract: &str, count: usize) {
        self.state()
            .failing_deploys
            .insert(contract.to_string(), count);
    }

    pub fn calls(&self) -> Vec<ChainCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn deploys_of(&self, contract: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, ChainCall::Deploy { contract: c, .. } if c == contract))
            .count()
    }

    pub fn deployed_contracts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ChainCall::Deploy { contract, .. } => Some(contract),
                _ => None,
            })
            .collect()
    }

    pub fn cuts(&self) -> Vec<(Vec<FacetCut>, String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ChainCall::Cut {
                    cuts,
                    init_address,
                    init_calldata,
                    ..
                } => Some((cuts, init_address, init_calldata)),
                _ => None,
            })
            .collect()
    }

    pub fn contract_calls(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ChainCall::Call { address, method } => Some((address, method)),
                _ => None,
            })
            .collect()
    }

    /// Deterministic stand-in for keccak selectors.
    pub fn selector_for(signature: &str) -> String {
        let mut hash: u32 = 0x811c_9dc5;
        for byte in signature.bytes() {
            hash ^= u32::from(byte);
            hash = hash.wrapping_mul(0x0100_0193);
        }
        format!("0x{hash:08x}")
    }

    fn next_tx(state: &mut MockState) -> String {
        state.next_id += 1;
        format!("0x{:064x}", state.next_id)
    }
}

#[async_trait]
impl ChainAdapter for MockChain {
    async fn signer_address(&self) -> anyhow::Result<String> {
        Ok(SIGNER.to_string())
    }

    async fn deploy_contract(&self, request: &DeployRequest) -> anyhow::Result<DeployedContract> {
        // Give concurrent callers a chance to interleave
        tokio::task::yield_now().await;
        let mut state = self.state();
        if let Some(remaining) = state.failing_deploys.get_mut(&request.contract) {
            if *remaining > 0 {
                *remaining -= 1;
                bail!("deployment of {} ran out of gas", request.contract);
            }
        }
        state.calls.push(ChainCall::Deploy {
            contract: request.contract.clone(),
            args: request.constructor_args.clone(),
            libraries: request.libraries.clone(),
        });
        let tx_hash = Self::next_tx(&mut state);
        let address = format!("0x{:040x}", state.next_id);
        let selectors = state
            .selectors
            .get(&request.contract)
            .cloned()
            .unwrap_or_default();
        Ok(DeployedContract {
            address,
            tx_hash,
            selectors,
            gas_used: Some("21000".to_string()),
            gas_price: Some("1000000000".to_string()),
        })
    }

    async fn call_contract(
        &self,
        address: &str,
        method: &str,
        _args: &[Value],
    ) -> anyhow::Result<TxReceipt> {
        let mut state = self.state();
        state.calls.push(ChainCall::Call {
            address: address.to_string(),
            method: method.to_string(),
        });
        Ok(TxReceipt {
            tx_hash: Self::next_tx(&mut state),
            success: true,
            gas_used: None,
            gas_price: None,
        })
    }

    async fn get_contract_at(
        &self,
        interface: &str,
        address: &str,
    ) -> anyhow::Result<ContractHandle> {
        Ok(ContractHandle {
            interface: interface.to_string(),
            address: address.to_string(),
        })
    }

    async fn submit_cut(
        &self,
        diamond: &ContractHandle,
        cuts: &[FacetCut],
        init_address: &str,
        init_calldata: &str,
    ) -> anyhow::Result<TxReceipt> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.calls.push(ChainCall::Cut {
            address: diamond.address.clone(),
            cuts: cuts.to_vec(),
            init_address: init_address.to_string(),
            init_calldata: init_calldata.to_string(),
        });
        let success = if state.reverting_cuts > 0 {
            state.reverting_cuts -= 1;
            false
        } else {
            true
        };
        Ok(TxReceipt {
            tx_hash: Self::next_tx(&mut state),
            success,
            gas_used: Some("150000".to_string()),
            gas_price: None,
        })
    }

    fn encode_selector(&self, signature: &str) -> anyhow::Result<String> {
        Ok(Self::selector_for(signature))
    }

    async fn impersonate_and_fund(&self, address: &str) -> anyhow::Result<()> {
        self.state().calls.push(ChainCall::Impersonate {
            address: address.to_string(),
        });
        Ok(())
    }
}

/// Temp project with `diamond.toml` and a facet config for `ProxyDiamond`.
pub struct Project {
    pub tmp: TempDir,
    pub diamond: ResolvedDiamond,
}

impl Project {
    pub fn new(facets_json: &str) -> Self {
        Self::on_network("hardhat", facets_json)
    }

    pub fn on_network(network: &str, facets_json: &str) -> Self {
        let tmp = TempDir::new().expect("tempdir should succeed");
        std::fs::write(tmp.path().join("diamond.toml"), PROJECT_TOML)
            .expect("write diamond.toml should succeed");
        let diamond = ConfigResolver::new(tmp.path())
            .expect("resolver should load")
            .resolve("ProxyDiamond", network)
            .expect("resolve should succeed");
        let project = Self { tmp, diamond };
        project.write_facets(facets_json);
        project
    }

    pub fn write_facets(&self, facets_json: &str) {
        let path = &self.diamond.paths.config_file_path;
        std::fs::create_dir_all(path.parent().expect("config dir"))
            .expect("create config dir should succeed");
        std::fs::write(path, facets_json).expect("write facet config should succeed");
    }

    pub fn coordinator(&self, chain: &MockChain) -> DeploymentCoordinator {
        DeploymentCoordinator::new(self.diamond.clone(), Arc::new(chain.clone()))
            .expect("coordinator should build")
    }

    /// Coordinator for the same diamond and project on another network.
    pub fn coordinator_on(&self, network: &str, chain: &MockChain) -> DeploymentCoordinator {
        let diamond = ConfigResolver::new(self.tmp.path())
            .expect("resolver should load")
            .resolve("ProxyDiamond", network)
            .expect("resolve should succeed");
        DeploymentCoordinator::new(diamond, Arc::new(chain.clone()))
            .expect("coordinator should build")
    }
}

pub const TWO_FACETS: &str = r#"{
    "FacetA": { "priority": 10, "versions": { "1": {} } },
    "FacetB": { "priority": 20, "versions": { "1": { "deployInit": "init()" } } }
}"#;

/// Chain with selectors for `FacetA` and `FacetB`.
pub fn two_facet_chain() -> MockChain {
    let chain = MockChain::new();
    chain.set_selectors("FacetA", &["0xaaaa0001", "0xaaaa0002"]);
    chain.set_selectors("FacetB", &["0xbbbb0001"]);
    chain
}
