//! End-to-end pipeline tests
//!
//! Every test here runs the real coordinator with local voter tasks and in-memory
//! custodians wired through the gossip hub.

mod round_test;

use crate::{NodeConfig, PipelineCoordinator};
use keel_consensus::{spawn_local_voters, Ed25519Signer, VoteSigner, VoterBehavior};
use keel_da::{InMemoryCustodian, ShardCustodian};
use keel_registry::Registry;
use keel_types::{unix_millis, Address, Transaction};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub(crate) const STAKE: u64 = 1_000;

pub(crate) struct TestNode {
    pub coordinator: PipelineCoordinator,
    pub validators: Vec<Address>,
    pub custodians: Vec<Arc<InMemoryCustodian>>,
    pub shutdown_tx: watch::Sender<bool>,
    pub shutdown: watch::Receiver<bool>,
    _voters: Vec<JoinHandle<()>>,
}

impl TestNode {
    pub fn registry(&self) -> &Arc<Registry> {
        self.coordinator.registry()
    }
}

pub(crate) fn test_config(phase_timeout_ms: u64) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.consensus.phase_timeout_ms = phase_timeout_ms;
    config
}

/// One validator per behavior, all staked equally, plus `custodian_count` custodians
pub(crate) fn node(config: NodeConfig, behaviors: &[VoterBehavior], custodian_count: usize) -> TestNode {
    node_with(config, behaviors, custodian_count, |builder| builder)
}

pub(crate) fn node_with(
    config: NodeConfig,
    behaviors: &[VoterBehavior],
    custodian_count: usize,
    customize: impl FnOnce(crate::PipelineBuilder) -> crate::PipelineBuilder,
) -> TestNode {
    let registry = Arc::new(Registry::new(config.registry.clone()));
    let signers: Vec<Arc<dyn VoteSigner>> = (0..behaviors.len())
        .map(|i| Arc::new(Ed25519Signer::from_label(&format!("validator-{}", i))) as Arc<dyn VoteSigner>)
        .collect();
    for signer in &signers {
        registry.register(signer.address(), STAKE).unwrap();
    }

    let custodians: Vec<Arc<InMemoryCustodian>> = (0..custodian_count)
        .map(|i| Arc::new(InMemoryCustodian::new(Address::from_label(&format!("custodian-{}", i)))))
        .collect();

    let mut builder = PipelineCoordinator::builder(config).registry(registry);
    for custodian in &custodians {
        builder = builder.custodian(custodian.clone() as Arc<dyn ShardCustodian>);
    }
    let coordinator = customize(builder).build().unwrap();

    let (shutdown_tx, shutdown) = watch::channel(false);
    let validators = signers.iter().map(|s| s.address()).collect();
    let voters = spawn_local_voters(
        signers.into_iter().zip(behaviors.iter().copied()).collect(),
        coordinator.gossip(),
        shutdown.clone(),
    );

    TestNode {
        coordinator,
        validators,
        custodians,
        shutdown_tx,
        shutdown,
        _voters: voters,
    }
}

/// Transaction submitted `age_ms` ago
pub(crate) fn tx(value: u64, age_ms: u64, nonce: u64) -> Transaction {
    Transaction::new(
        Address::from_label("alice"),
        Address::from_label("bob"),
        value,
        nonce,
        unix_millis().saturating_sub(age_ms),
    )
}

pub(crate) fn honest(n: usize) -> Vec<VoterBehavior> {
    vec![VoterBehavior::Honest; n]
}
