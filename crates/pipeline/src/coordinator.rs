//! Round coordinator
//!
//! Drives one round at a time: sequence, execute, record, vote, settle, post to DA.
//! A finalized batch is never undone; anything that fails after finalization is logged
//! and reported, never rolled back.

use crate::config::NodeConfig;
use crate::error::PipelineError;
use keel_consensus::{
    ConsensusEngine, Ed25519Verifier, GossipHub, Proposal, RejectReason, RoundOutcome, VoteInbox, VoteVerifier,
};
use keel_da::{payload_commitment, DaEngine, ShardCustodian};
use keel_registry::{Registry, SlashReason};
use keel_sequencer::{InclusionPolicy, SequencedBatch, Sequencer, TransactionSender};
use keel_settlement::{ExecutionEngine, PlaceholderExecutor, Settlement};
use keel_types::{unix_millis, Address, BatchId, FinalizedBatchEvent, Hash, Round, StateRoot, Transaction};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// What one call to [`PipelineCoordinator::run_round`] did
#[derive(Debug, Clone, PartialEq)]
pub enum RoundReport {
    /// Nothing pending, no round started
    Idle,
    Finalized {
        round: Round,
        batch_id: BatchId,
        tx_count: usize,
        state_root: StateRoot,
        da_commitment: Hash,
        /// `None` when the block was not sampled or could not be posted
        availability_confidence: Option<f64>,
    },
    Rejected {
        round: Round,
        batch_id: BatchId,
        reason: RejectReason,
    },
    Cancelled {
        round: Round,
        batch_id: BatchId,
    },
}

impl RoundReport {
    pub fn is_finalized(&self) -> bool {
        matches!(self, RoundReport::Finalized { .. })
    }
}

/// Totals over the coordinator's lifetime
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub rounds: u64,
    pub idle_ticks: u64,
    pub finalized: u64,
    pub rejected: u64,
    pub cancelled: u64,
    pub transactions_finalized: u64,
    pub da_failures: u64,
    pub round_errors: u64,
}

/// Builder for [`PipelineCoordinator`]
pub struct PipelineBuilder {
    config: NodeConfig,
    registry: Option<Arc<Registry>>,
    verifier: Option<Arc<dyn VoteVerifier>>,
    executor: Option<Arc<dyn ExecutionEngine>>,
    policy: Option<Arc<dyn InclusionPolicy>>,
    sequencers: Option<Vec<Address>>,
    custodians: Vec<Arc<dyn ShardCustodian>>,
}

impl PipelineBuilder {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            registry: None,
            verifier: None,
            executor: None,
            policy: None,
            sequencers: None,
            custodians: Vec::new(),
        }
    }

    /// Share an existing registry instead of creating one from config
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn VoteVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ExecutionEngine>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn inclusion_policy(mut self, policy: Arc<dyn InclusionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Sequencer rotation; defaults to every validator registered at build time
    pub fn sequencers(mut self, sequencers: Vec<Address>) -> Self {
        self.sequencers = Some(sequencers);
        self
    }

    pub fn custodian(mut self, custodian: Arc<dyn ShardCustodian>) -> Self {
        self.custodians.push(custodian);
        self
    }

    pub fn build(self) -> Result<PipelineCoordinator, PipelineError> {
        let config = self.config;
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(Registry::new(config.registry.clone())));
        let verifier = self.verifier.unwrap_or_else(|| Arc::new(Ed25519Verifier) as Arc<dyn VoteVerifier>);
        let executor = self.executor.unwrap_or_else(|| Arc::new(PlaceholderExecutor) as Arc<dyn ExecutionEngine>);

        let sequencers = self
            .sequencers
            .unwrap_or_else(|| registry.validators().into_iter().map(|v| v.address).collect());
        let sequencer = Sequencer::new(config.sequencer.clone(), registry.clone(), sequencers)?;
        if let Some(policy) = self.policy {
            sequencer.set_policy(policy);
        }

        let da = DaEngine::new(config.da.clone())?;
        for custodian in self.custodians {
            da.add_custodian(custodian);
        }

        let consensus = ConsensusEngine::new(registry.clone(), verifier, config.consensus.clone());
        let (gossip, inbox) = GossipHub::new(config.pipeline.gossip_capacity.max(1));
        let (events, _) = broadcast::channel(config.pipeline.event_capacity.max(1));

        Ok(PipelineCoordinator {
            config,
            registry,
            sequencer: Arc::new(sequencer),
            settlement: Arc::new(Settlement::new()),
            consensus: Arc::new(consensus),
            da: Arc::new(da),
            executor,
            gossip,
            inbox,
            events,
            stats: PipelineStats::default(),
        })
    }
}

/// Owns every pipeline component and runs rounds strictly one after another
pub struct PipelineCoordinator {
    config: NodeConfig,
    registry: Arc<Registry>,
    sequencer: Arc<Sequencer>,
    settlement: Arc<Settlement>,
    consensus: Arc<ConsensusEngine>,
    da: Arc<DaEngine>,
    executor: Arc<dyn ExecutionEngine>,
    gossip: GossipHub,
    inbox: VoteInbox,
    events: broadcast::Sender<FinalizedBatchEvent>,
    stats: PipelineStats,
}

impl PipelineCoordinator {
    pub fn builder(config: NodeConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn sequencer(&self) -> &Arc<Sequencer> {
        &self.sequencer
    }

    pub fn settlement(&self) -> &Arc<Settlement> {
        &self.settlement
    }

    pub fn consensus(&self) -> &Arc<ConsensusEngine> {
        &self.consensus
    }

    pub fn da(&self) -> &Arc<DaEngine> {
        &self.da
    }

    /// Hub local voters subscribe to for proposals and answer through
    pub fn gossip(&self) -> &GossipHub {
        &self.gossip
    }

    pub fn transaction_sender(&self) -> TransactionSender {
        self.sequencer.transaction_sender()
    }

    /// Subscribe to finalized batches
    pub fn subscribe(&self) -> broadcast::Receiver<FinalizedBatchEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Run a single round over whatever is pending right now
    pub async fn run_round(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<RoundReport, PipelineError> {
        self.sequencer.drain_intake();
        if self.sequencer.pending_len() == 0 {
            self.stats.idle_ticks += 1;
            return Ok(RoundReport::Idle);
        }

        let ctx = self.consensus.begin_round();
        let sequenced = self.sequencer.sequence(ctx.round, unix_millis(), &ctx.seed)?;
        self.apply_slash_requests(&sequenced);
        if sequenced.is_empty() {
            self.stats.idle_ticks += 1;
            return Ok(RoundReport::Idle);
        }

        let state_root = self.executor.execute(&sequenced.transactions).await?;
        let batch = self
            .settlement
            .create_batch(sequenced.tx_hashes.clone(), sequenced.leader, state_root);
        let proposal = Proposal::new(
            ctx.round,
            batch.id,
            ctx.proposer.unwrap_or_default(),
            sequenced.tx_hashes.clone(),
            sequenced.reference_ms,
            state_root,
        );
        self.settlement.mark_pending(batch.id, ctx.round)?;
        self.stats.rounds += 1;

        let stale = self.inbox.drain();
        if stale > 0 {
            tracing::debug!("Discarded {} stale votes before round {}", stale, ctx.round);
        }
        let receivers = self.gossip.publish(&proposal);
        tracing::debug!(
            "Round {}: batch {} ({} txs) proposed by {} to {} voters",
            ctx.round,
            batch.id,
            sequenced.len(),
            proposal.proposer,
            receivers
        );

        match self
            .consensus
            .run_round(&ctx, &proposal, &mut self.inbox, shutdown)
            .await
        {
            RoundOutcome::Finalized(_) => self.on_finalized(ctx.round, batch.id, state_root, &sequenced).await,
            RoundOutcome::Rejected { reason, .. } => {
                self.settlement.reject(batch.id)?;
                self.stats.rejected += 1;
                Ok(RoundReport::Rejected {
                    round: ctx.round,
                    batch_id: batch.id,
                    reason,
                })
            }
            RoundOutcome::Cancelled { round } => {
                self.settlement.reject(batch.id)?;
                self.stats.cancelled += 1;
                Ok(RoundReport::Cancelled {
                    round,
                    batch_id: batch.id,
                })
            }
        }
    }

    async fn on_finalized(
        &mut self,
        round: Round,
        batch_id: BatchId,
        state_root: StateRoot,
        sequenced: &SequencedBatch,
    ) -> Result<RoundReport, PipelineError> {
        self.settlement.finalize(batch_id)?;
        self.sequencer.mark_included(&sequenced.tx_hashes);
        self.stats.finalized += 1;
        self.stats.transactions_finalized += sequenced.len() as u64;

        let payload = encode_payload(&sequenced.transactions)?;
        let da_commitment = payload_commitment(&payload);
        let availability_confidence = self.publish_to_da(batch_id, payload).await;

        let event = FinalizedBatchEvent {
            batch_id,
            tx_hashes: sequenced.tx_hashes.clone(),
            state_root,
            da_commitment,
            availability_confidence,
        };
        // no subscribers is fine
        let _ = self.events.send(event);

        Ok(RoundReport::Finalized {
            round,
            batch_id,
            tx_count: sequenced.len(),
            state_root,
            da_commitment,
            availability_confidence,
        })
    }

    /// Post and optionally sample; failures here never undo finality
    async fn publish_to_da(&mut self, batch_id: BatchId, payload: Vec<u8>) -> Option<f64> {
        if let Err(e) = self.da.post_data(batch_id, payload).await {
            self.stats.da_failures += 1;
            tracing::warn!("Finalized batch {} could not be posted to DA: {}", batch_id, e);
            return None;
        }
        if !self.config.pipeline.sample_after_post {
            return None;
        }

        let confidence = match self.da.light_client_sample(batch_id).await {
            Ok(report) => {
                if !report.available {
                    tracing::warn!(
                        "Batch {} sampled below availability threshold ({:.2})",
                        batch_id,
                        report.confidence
                    );
                }
                Some(report.confidence)
            }
            Err(e) => {
                self.stats.da_failures += 1;
                tracing::warn!("Sampling batch {} failed: {}", batch_id, e);
                None
            }
        };
        self.slash_bad_custodians(batch_id);
        confidence
    }

    fn apply_slash_requests(&self, sequenced: &SequencedBatch) {
        for request in &sequenced.slash_requests {
            if let Err(e) = self
                .consensus
                .slash(&request.address, request.reason, Some(request.round))
            {
                tracing::warn!("Could not slash sequencer {}: {}", request.address, e);
            }
        }
    }

    /// Custodians that served shards not matching their digest; only registered ones are slashed
    fn slash_bad_custodians(&self, batch_id: BatchId) {
        for (custodian, bad_shards) in self.da.take_bad_custodians() {
            if self.registry.get(&custodian).is_none() {
                tracing::warn!("Unregistered custodian {} served {} bad shards", custodian, bad_shards);
                continue;
            }
            if let Err(e) = self
                .consensus
                .slash(&custodian, SlashReason::CommitmentMismatch, None)
            {
                tracing::warn!("Could not slash custodian {} (batch {}): {}", custodian, batch_id, e);
            }
        }
    }

    /// Run rounds on the configured interval until shutdown, or until `max_rounds` non-idle
    /// rounds have completed
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>, max_rounds: Option<u64>) -> PipelineStats {
        let interval_ms = self.config.pipeline.round_interval_ms.max(1);
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            "Pipeline started ({}ms rounds, {} active validators, {} custodians)",
            interval_ms,
            self.registry.snapshot().len(),
            self.da.custodians().len()
        );

        let mut attempts = 0u64;
        loop {
            if max_rounds.is_some_and(|max| attempts >= max) {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown.borrow() {
                break;
            }

            match self.run_round(&mut shutdown).await {
                Ok(RoundReport::Idle) => continue,
                Ok(RoundReport::Finalized { round, batch_id, tx_count, .. }) => {
                    tracing::debug!("Round {} finalized batch {} ({} txs)", round, batch_id, tx_count);
                }
                Ok(RoundReport::Rejected { round, reason, .. }) => {
                    tracing::debug!("Round {} rejected: {:?}", round, reason);
                }
                Ok(RoundReport::Cancelled { .. }) => break,
                Err(e) => {
                    self.stats.round_errors += 1;
                    tracing::error!("Round failed: {}", e);
                }
            }
            attempts += 1;
        }

        tracing::info!(
            "Pipeline stopped: {} rounds, {} finalized, {} rejected",
            self.stats.rounds,
            self.stats.finalized,
            self.stats.rejected
        );
        self.stats
    }
}

/// DA payload of a batch: its ordered transactions, borsh-encoded
pub fn encode_payload(transactions: &[Transaction]) -> Result<Vec<u8>, PipelineError> {
    borsh::to_vec(transactions).map_err(|e| PipelineError::Codec(e.to_string()))
}

/// Inverse of [`encode_payload`]
pub fn decode_payload(payload: &[u8]) -> Result<Vec<Transaction>, PipelineError> {
    borsh::from_slice(payload).map_err(|e| PipelineError::Codec(e.to_string()))
}
