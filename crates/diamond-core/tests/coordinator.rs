//! End-to-end deploy and upgrade runs against a recording chain.

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use diamond_core::callbacks::{CallbackContext, CallbackRegistry, PostDeployCallback};
use diamond_core::coordinator::{CoordinatorRegistry, Operation, identity_of};
use diamond_core::error::DeployError;
use diamond_core::steps::{DeploymentStep, StepStatus, names};
use diamond_core::types::{FacetCut, FacetCutAction, ZERO_ADDRESS};
use serde_json::json;

use support::{CUT_SELECTOR, MockChain, Project, SIGNER, TWO_FACETS, two_facet_chain};

// ============================================================================
// First deployment
// ============================================================================

#[tokio::test]
async fn first_deploy_cuts_facets_in_priority_order() {
    let project = Project::new(TWO_FACETS);
    let chain = two_facet_chain();
    let coordinator = project.coordinator(&chain);

    let info = coordinator.deploy().await.expect("deploy should succeed");

    assert_eq!(
        chain.deployed_contracts(),
        vec!["DiamondCutFacet", "ProxyDiamond", "FacetA", "FacetB"]
    );
    let diamond = info.diamond_address.clone().expect("diamond address recorded");
    assert_eq!(info.deployer_address.as_deref(), Some(SIGNER));

    let cut_facet = info.facet("DiamondCutFacet").expect("cut facet recorded");
    assert_eq!(cut_facet.func_selectors, vec![CUT_SELECTOR]);
    match &chain.calls()[1] {
        support::ChainCall::Deploy { args, .. } => {
            assert_eq!(args, &vec![json!(SIGNER), json!(cut_facet.address)]);
        }
        other => panic!("unexpected call: {other:?}"),
    }

    // One cut transaction, Add for each facet in priority order
    let cuts = chain.cuts();
    assert_eq!(cuts.len(), 1);
    let (batch, init_address, init_calldata) = &cuts[0];
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].name, "FacetA");
    assert_eq!(batch[0].action, FacetCutAction::Add);
    assert_eq!(batch[0].function_selectors, vec!["0xaaaa0001", "0xaaaa0002"]);
    assert!(batch[0].init_func.is_none());
    assert_eq!(batch[1].name, "FacetB");
    let init_selector = MockChain::selector_for("init()");
    assert_eq!(batch[1].init_func.as_deref(), Some(init_selector.as_str()));
    assert_eq!(init_address, ZERO_ADDRESS);
    assert_eq!(init_calldata, "0x");

    // FacetB's initializer runs once on the diamond after the cut
    assert_eq!(chain.contract_calls(), vec![(diamond, init_selector)]);

    let facet_a = info.facet("FacetA").expect("FacetA recorded");
    assert_eq!(facet_a.version.to_string(), "1");
    assert!(info.pending_cuts.is_none());

    let config = project.diamond.load_facets().expect("config loads");
    let steps = coordinator
        .step_registry(&coordinator.deployment_id(Operation::Deploy, &config))
        .expect("registry opens");
    let summary = steps.summary();
    assert!(summary.is_complete, "summary: {summary:?}");
    assert!(steps.is_step_completed(names::DEPLOY_CUT_FACET));
    assert!(steps.is_step_completed(names::DEPLOY_DIAMOND));
    assert!(steps.is_step_completed(&names::deploy_facet("FacetA", "1")));
    assert!(steps.is_step_completed(names::DIAMOND_CUT));
    assert!(steps.is_step_completed(&names::init("FacetB")));
    assert_eq!(steps.registry().chain_id, 31337);
    assert_eq!(steps.registry().deployer_address, SIGNER);
    assert!(steps.registry().completed_at.is_some());
    assert!(coordinator.status().deploy_completed);
}

#[tokio::test]
async fn repeated_deploy_makes_no_chain_calls() {
    let project = Project::new(TWO_FACETS);
    let chain = two_facet_chain();
    let first = project.coordinator(&chain).deploy().await.expect("deploy should succeed");
    chain.clear_calls();

    let coordinator = project.coordinator(&chain);
    let again = coordinator.deploy().await.expect("deploy should succeed");
    let third = coordinator.deploy().await.expect("deploy should succeed");

    assert_eq!(again, first);
    assert_eq!(third, first);
    assert!(chain.calls().is_empty());
}

#[tokio::test]
async fn concurrent_deploys_run_once() {
    let project = Project::new(TWO_FACETS);
    let chain = two_facet_chain();
    let coordinator = Arc::new(project.coordinator(&chain));

    let (a, b) = tokio::join!(coordinator.deploy(), coordinator.deploy());
    let a = a.expect("first deploy should succeed");
    let b = b.expect("second deploy should succeed");

    assert_eq!(a.diamond_address, b.diamond_address);
    assert_eq!(chain.deploys_of("DiamondCutFacet"), 1);
    assert_eq!(chain.deploys_of("ProxyDiamond"), 1);
    assert_eq!(chain.deploys_of("FacetA"), 1);
    assert_eq!(chain.cuts().len(), 1);
}

#[tokio::test]
async fn registry_shares_one_coordinator_per_identity() {
    let project = Project::new(TWO_FACETS);
    let chain = two_facet_chain();
    let registry = CoordinatorRegistry::new();
    let identity = identity_of(&project.diamond).expect("network declared");

    let first = registry
        .get_or_create(&identity, || Ok(project.coordinator(&chain)))
        .expect("create should succeed");
    let second = registry
        .get_or_create(&identity, || panic!("coordinator must be reused"))
        .expect("lookup should succeed");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), 1);
    assert_eq!(identity.key(), "hardhat-31337-proxydiamond");

    let (a, b) = tokio::join!(first.deploy(), second.deploy());
    a.expect("deploy should succeed");
    b.expect("deploy should succeed");
    assert_eq!(chain.deploys_of("ProxyDiamond"), 1);
}

#[tokio::test]
async fn upgrade_during_deploy_waits_for_the_diamond() {
    let project = Project::new(TWO_FACETS);
    let chain = two_facet_chain();
    let coordinator = Arc::new(project.coordinator(&chain));

    let (deployed, upgraded) = tokio::join!(coordinator.deploy(), coordinator.upgrade());
    let deployed = deployed.expect("deploy should succeed");
    let upgraded = upgraded.expect("upgrade should wait for the deploy");

    assert!(deployed.diamond_address.is_some());
    assert_eq!(upgraded.diamond_address, deployed.diamond_address);
    assert_eq!(chain.deploys_of("ProxyDiamond"), 1);
    assert_eq!(chain.deploys_of("FacetA"), 1);
    assert_eq!(chain.cuts().len(), 1);
}

#[tokio::test]
async fn same_diamond_deploys_independently_per_network() {
    let project = Project::new(TWO_FACETS);
    let chain = two_facet_chain();
    let hardhat = project.coordinator(&chain);
    let sepolia = project.coordinator_on("sepolia", &chain);

    let first = hardhat.deploy().await.expect("hardhat deploy should succeed");
    let second = sepolia.deploy().await.expect("sepolia deploy should succeed");

    assert_ne!(first.diamond_address, second.diamond_address);
    assert_eq!(chain.deploys_of("ProxyDiamond"), 2);
    assert_eq!(chain.cuts().len(), 2);

    let config = project.diamond.load_facets().expect("config loads");
    let deployment_id = hardhat.deployment_id(Operation::Deploy, &config);
    assert_eq!(sepolia.deployment_id(Operation::Deploy, &config), deployment_id);

    let hardhat_steps = hardhat.step_registry(&deployment_id).expect("registry opens");
    let sepolia_steps = sepolia.step_registry(&deployment_id).expect("registry opens");
    assert_ne!(hardhat_steps.path(), sepolia_steps.path());
    assert_eq!(hardhat_steps.registry().network, "hardhat");
    assert_eq!(hardhat_steps.registry().chain_id, 31337);
    assert_eq!(sepolia_steps.registry().network, "sepolia");
    assert_eq!(sepolia_steps.registry().chain_id, 11155111);
    assert!(hardhat_steps.summary().is_complete);
    assert!(sepolia_steps.summary().is_complete);
}

// ============================================================================
// Upgrades
// ============================================================================

#[tokio::test]
async fn upgrade_requires_a_deployed_diamond() {
    let project = Project::new(TWO_FACETS);
    let chain = two_facet_chain();
    let err = project.coordinator(&chain).upgrade().await.unwrap_err();

    assert!(matches!(err, DeployError::DiamondNotDeployed { .. }));
    assert!(chain.calls().is_empty());
}

#[tokio::test]
async fn version_bump_with_same_selectors_replaces_only() {
    let project = Project::new(r#"{ "FacetA": { "versions": { "1": {} } } }"#);
    let chain = two_facet_chain();
    let coordinator = project.coordinator(&chain);
    let deployed = coordinator.deploy().await.expect("deploy should succeed");
    let old_address = deployed.facet("FacetA").expect("FacetA").address.clone();
    chain.clear_calls();

    project.write_facets(r#"{ "FacetA": { "versions": { "1": {}, "2": {} } } }"#);
    let info = coordinator.upgrade().await.expect("upgrade should succeed");

    assert_eq!(chain.deployed_contracts(), vec!["FacetA"]);
    let cuts = chain.cuts();
    assert_eq!(cuts.len(), 1);
    let batch = &cuts[0].0;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].action, FacetCutAction::Replace);
    assert_eq!(batch[0].function_selectors, vec!["0xaaaa0001", "0xaaaa0002"]);

    let record = info.facet("FacetA").expect("FacetA");
    assert_eq!(record.version.to_string(), "2");
    assert_ne!(record.address, old_address);
    assert_eq!(batch[0].facet_address, record.address);
    assert!(coordinator.status().upgrade_completed);

    // Nothing left to do on a second upgrade
    chain.clear_calls();
    coordinator.upgrade().await.expect("upgrade should succeed");
    assert!(chain.calls().is_empty());
}

#[tokio::test]
async fn upgrade_removes_dropped_facets_and_changed_selectors() {
    let project = Project::new(TWO_FACETS);
    let chain = two_facet_chain();
    let coordinator = project.coordinator(&chain);
    coordinator.deploy().await.expect("deploy should succeed");
    chain.clear_calls();

    chain.set_selectors("FacetA", &["0xaaaa0002", "0xaaaa0003"]);
    project.write_facets(r#"{ "FacetA": { "versions": { "2": {} } } }"#);
    let info = coordinator.upgrade().await.expect("upgrade should succeed");

    let cuts = chain.cuts();
    assert_eq!(cuts.len(), 1);
    let batch: Vec<_> = cuts[0]
        .0
        .iter()
        .map(|c| (c.name.as_str(), c.action, c.function_selectors.clone()))
        .collect();
    assert_eq!(
        batch,
        vec![
            ("FacetB", FacetCutAction::Remove, vec!["0xbbbb0001".to_string()]),
            ("FacetA", FacetCutAction::Remove, vec!["0xaaaa0001".to_string()]),
            ("FacetA", FacetCutAction::Replace, vec!["0xaaaa0002".to_string()]),
            ("FacetA", FacetCutAction::Add, vec!["0xaaaa0003".to_string()]),
        ]
    );
    assert!(
        cuts[0]
            .0
            .iter()
            .filter(|c| c.action == FacetCutAction::Remove)
            .all(|c| c.facet_address == ZERO_ADDRESS)
    );

    assert!(info.facet("FacetB").is_none());
    assert!(info.facet("DiamondCutFacet").is_some());
    assert_eq!(
        info.facet("FacetA").expect("FacetA").func_selectors,
        vec!["0xaaaa0002", "0xaaaa0003"]
    );
}

#[tokio::test]
async fn disallowed_upgrade_origin_fails_before_chain_calls() {
    let project = Project::new(TWO_FACETS);
    let chain = two_facet_chain();
    let coordinator = project.coordinator(&chain);
    coordinator.deploy().await.expect("deploy should succeed");
    chain.clear_calls();

    project.write_facets(
        r#"{
            "FacetA": { "priority": 10, "versions": { "3": { "fromVersions": [2] } } },
            "FacetB": { "priority": 20, "versions": { "1": {} } }
        }"#,
    );
    let err = coordinator.upgrade().await.unwrap_err();

    assert!(matches!(err, DeployError::UpgradePathNotAllowed { .. }));
    assert!(err.is_configuration());
    assert!(chain.calls().is_empty());
}

#[tokio::test]
async fn upgrade_init_replaces_deploy_init_on_upgrade() {
    let project = Project::new(TWO_FACETS);
    let chain = two_facet_chain();
    let coordinator = project.coordinator(&chain);
    coordinator.deploy().await.expect("deploy should succeed");
    chain.clear_calls();

    project.write_facets(
        r#"{
            "FacetA": { "priority": 10, "versions": { "1": {} } },
            "FacetB": { "priority": 20, "versions": {
                "1": { "deployInit": "init()" },
                "2": { "deployInit": "init()", "upgradeInit": "migrate()" }
            } }
        }"#,
    );
    coordinator.upgrade().await.expect("upgrade should succeed");

    let diamond = coordinator
        .deployment_info()
        .expect("info loads")
        .diamond_address
        .expect("diamond");
    assert_eq!(
        chain.contract_calls(),
        vec![(diamond, MockChain::selector_for("migrate()"))]
    );
}

// ============================================================================
// Collisions and failures
// ============================================================================

#[tokio::test]
async fn strict_policy_rejects_selector_owned_by_another_facet() {
    let project = Project::new(TWO_FACETS);
    let chain = two_facet_chain();
    chain.set_selectors("FacetB", &["0xaaaa0001"]);

    let err = project.coordinator(&chain).deploy().await.unwrap_err();
    match err {
        DeployError::SelectorCollision {
            selector,
            facet,
            owner,
        } => {
            assert_eq!(selector, "0xaaaa0001");
            assert_eq!(facet, "FacetB");
            assert_eq!(owner, "FacetA");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(chain.cuts().is_empty());
}

#[tokio::test]
async fn reverted_cut_resumes_without_redeploying_facets() {
    let project = Project::new(TWO_FACETS);
    let chain = two_facet_chain();
    chain.revert_cuts(1);
    let coordinator = project.coordinator(&chain);

    let err = coordinator.deploy().await.unwrap_err();
    assert!(matches!(err, DeployError::CutReverted { .. }));
    assert!(!coordinator.status().deploy_completed);

    let info = coordinator.deployment_info().expect("info loads");
    let pending = info.pending_cuts.as_ref().expect("pending batch kept");
    assert_eq!(pending.cuts.len(), 2);
    assert!(info.facet("FacetB").is_some());

    let config = project.diamond.load_facets().expect("config loads");
    let deployment_id = coordinator.deployment_id(Operation::Deploy, &config);
    let steps = coordinator.step_registry(&deployment_id).expect("registry opens");
    assert!(steps.is_step_failed(names::DIAMOND_CUT));
    assert!(steps.registry().failed_at.is_some());

    let info = coordinator.deploy().await.expect("resumed deploy should succeed");
    assert!(info.pending_cuts.is_none());
    assert_eq!(chain.deploys_of("DiamondCutFacet"), 1);
    assert_eq!(chain.deploys_of("ProxyDiamond"), 1);
    assert_eq!(chain.deploys_of("FacetA"), 1);
    assert_eq!(chain.deploys_of("FacetB"), 1);
    assert_eq!(chain.cuts().len(), 2);
    assert_eq!(chain.cuts()[1].0, chain.cuts()[0].0);

    let steps = coordinator.step_registry(&deployment_id).expect("registry opens");
    let cut = steps.step(names::DIAMOND_CUT).expect("cut step");
    assert_eq!(cut.status, StepStatus::Completed);
    assert_eq!(cut.retry_count, 1);
    assert!(steps.summary().is_complete);
}

#[tokio::test]
async fn batch_left_by_another_deployment_goes_out_first() {
    let project = Project::new(TWO_FACETS);
    let chain = two_facet_chain();
    let coordinator = project.coordinator(&chain);
    let info = coordinator.deploy().await.expect("deploy should succeed");
    let facet_a = info.facet("FacetA").expect("FacetA recorded").clone();

    let leftover = FacetCut {
        facet_address: facet_a.address.clone(),
        action: FacetCutAction::Replace,
        function_selectors: facet_a.func_selectors.clone(),
        name: "FacetA".to_string(),
        init_func: None,
    };
    coordinator
        .info_store()
        .modify(|info| info.queue_pending("upgrade-earlier", vec![leftover.clone()], Vec::new()))
        .expect("queue should succeed");
    chain.clear_calls();

    let info = coordinator.upgrade().await.expect("upgrade should succeed");

    assert!(info.pending_cuts.is_none());
    assert!(chain.deployed_contracts().is_empty());
    let cuts = chain.cuts();
    assert_eq!(cuts.len(), 1);
    assert_eq!(cuts[0].0, vec![leftover]);

    let earlier = coordinator.step_registry("upgrade-earlier").expect("registry opens");
    assert!(earlier.is_step_completed(names::DIAMOND_CUT));

    let config = project.diamond.load_facets().expect("config loads");
    let upgrade_id = coordinator.deployment_id(Operation::Upgrade, &config);
    let steps = coordinator.step_registry(&upgrade_id).expect("registry opens");
    assert!(steps.step(names::DIAMOND_CUT).is_none());
    assert!(steps.registry().completed_at.is_some());
}

#[tokio::test]
async fn deploy_step_interrupted_after_its_record_is_completed() {
    let project = Project::new(TWO_FACETS);
    let chain = two_facet_chain();
    let coordinator = project.coordinator(&chain);
    let info = coordinator.deploy().await.expect("deploy should succeed");
    let record = info.facet("FacetA").expect("FacetA recorded").clone();

    // The record already moved to v1 but the step never left in_progress
    let config = project.diamond.load_facets().expect("config loads");
    let upgrade_id = coordinator.deployment_id(Operation::Upgrade, &config);
    let step_name = names::deploy_facet("FacetA", "1");
    coordinator
        .step_registry(&upgrade_id)
        .expect("registry opens")
        .save_step(DeploymentStep::new(&step_name, StepStatus::InProgress))
        .expect("save should succeed");
    chain.clear_calls();

    coordinator.upgrade().await.expect("upgrade should succeed");

    assert!(chain.deployed_contracts().is_empty());
    assert!(chain.cuts().is_empty());
    let steps = coordinator.step_registry(&upgrade_id).expect("registry opens");
    let step = steps.step(&step_name).expect("step kept");
    assert_eq!(step.status, StepStatus::Completed);
    assert_eq!(step.tx_hash.as_deref(), Some(record.tx_hash.as_str()));
    assert_eq!(step.contract_address.as_deref(), Some(record.address.as_str()));
    assert!(steps.summary().is_complete);
}

#[tokio::test]
async fn failed_facet_deploy_keeps_earlier_progress() {
    let project = Project::new(TWO_FACETS);
    let chain = two_facet_chain();
    chain.fail_deploys("FacetB", 1);
    let coordinator = project.coordinator(&chain);

    let err = coordinator.deploy().await.unwrap_err();
    assert!(matches!(err, DeployError::Chain { .. }));

    let info = coordinator.deployment_info().expect("info loads");
    assert!(info.facet("FacetA").is_some());
    assert!(info.facet("FacetB").is_none());
    assert_eq!(info.pending_cuts.as_ref().map(|p| p.cuts.len()), Some(1));

    coordinator.deploy().await.expect("resumed deploy should succeed");
    assert_eq!(chain.deploys_of("FacetA"), 1);
    assert_eq!(chain.deploys_of("FacetB"), 1);
    let cuts = chain.cuts();
    assert_eq!(cuts.len(), 1);
    assert_eq!(cuts[0].0.len(), 2);
}

// ============================================================================
// Initializers and callbacks
// ============================================================================

struct CountingCallback {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl PostDeployCallback for CountingCallback {
    async fn run(&self, ctx: &CallbackContext<'_>) -> anyhow::Result<()> {
        assert_eq!(ctx.facet, "FacetB");
        assert_eq!(ctx.version.to_string(), "1");
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn callbacks_run_once_after_the_cut() {
    let project = Project::new(
        r#"{
            "FacetA": { "priority": 10, "versions": { "1": {} } },
            "FacetB": { "priority": 20, "versions": { "1": { "callback": "seedRoles" } } }
        }"#,
    );
    let chain = two_facet_chain();
    let runs = Arc::new(AtomicUsize::new(0));
    let callbacks = CallbackRegistry::new().with(
        "seedRoles",
        Arc::new(CountingCallback {
            runs: Arc::clone(&runs),
        }),
    );
    let coordinator = project.coordinator(&chain).with_callbacks(callbacks);

    coordinator.deploy().await.expect("deploy should succeed");
    coordinator.deploy().await.expect("deploy should succeed");
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let config = project.diamond.load_facets().expect("config loads");
    let steps = coordinator
        .step_registry(&coordinator.deployment_id(Operation::Deploy, &config))
        .expect("registry opens");
    assert!(steps.is_step_completed(&names::callback("FacetB", "seedRoles")));
}

#[tokio::test]
async fn unknown_callback_fails_before_chain_calls() {
    let project = Project::new(
        r#"{ "FacetA": { "versions": { "1": { "callback": ["missing"] } } } }"#,
    );
    let chain = two_facet_chain();

    let err = project.coordinator(&chain).deploy().await.unwrap_err();
    assert!(matches!(err, DeployError::UnknownCallback { .. }));
    assert!(chain.calls().is_empty());
}

#[tokio::test]
async fn protocol_initializer_travels_with_the_cut() {
    let project = Project::new(
        r#"{
            "protocolVersion": 1,
            "protocolInitFacet": "ProtocolFacet",
            "facets": {
                "FacetA": { "priority": 10, "versions": { "1": {} } },
                "ProtocolFacet": { "priority": 20, "versions": { "1": { "deployInit": "initialize()" } } }
            }
        }"#,
    );
    let chain = two_facet_chain();
    chain.set_selectors("ProtocolFacet", &["0xcccc0001"]);
    let coordinator = project.coordinator(&chain);

    let info = coordinator.deploy().await.expect("deploy should succeed");

    let protocol = info.facet("ProtocolFacet").expect("ProtocolFacet recorded");
    let cuts = chain.cuts();
    assert_eq!(cuts.len(), 1);
    assert_eq!(cuts[0].1, protocol.address);
    assert_eq!(cuts[0].2, MockChain::selector_for("initialize()"));
    assert!(chain.contract_calls().is_empty());
}

#[tokio::test]
async fn libraries_are_deployed_and_linked() {
    let project = Project::new(
        r#"{ "FacetA": { "libraries": ["MathLib"], "versions": { "1": {} } } }"#,
    );
    let chain = two_facet_chain();
    project.coordinator(&chain).deploy().await.expect("deploy should succeed");

    let calls = chain.calls();
    let deploy_of = |name: &str| {
        calls
            .iter()
            .position(|c| matches!(c, support::ChainCall::Deploy { contract, .. } if contract == name))
            .expect("contract deployed")
    };
    assert!(deploy_of("MathLib") < deploy_of("FacetA"));

    let linked = calls
        .iter()
        .find_map(|c| match c {
            support::ChainCall::Deploy {
                contract,
                libraries,
                ..
            } if contract == "FacetA" => Some(libraries.clone()),
            _ => None,
        })
        .expect("facet deployed");
    assert!(linked.contains_key("MathLib"));
}

// ============================================================================
// Dev network helpers
// ============================================================================

#[tokio::test]
async fn impersonation_is_limited_to_dev_networks() {
    let chain = two_facet_chain();

    let dev = Project::new(TWO_FACETS);
    dev.coordinator(&chain)
        .impersonate_and_fund("0x0000000000000000000000000000000000000001")
        .await
        .expect("dev network allows impersonation");

    let live = Project::on_network("sepolia", TWO_FACETS);
    let err = live
        .coordinator(&chain)
        .impersonate_and_fund("0x0000000000000000000000000000000000000001")
        .await
        .unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(chain.calls().len(), 1);
}
