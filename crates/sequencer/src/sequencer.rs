//! Sequencer - turns the pending pool into one ordered batch per round

use crate::config::SequencerConfig;
use crate::error::SequencerError;
use crate::leader::LeaderRotation;
use crate::ordering::{select_batch, IncludeAll, InclusionPolicy};
use crate::parallel::ParallelOrderer;
use crate::pool::{PendingPool, TransactionSender};
use crate::priority::sort_by_priority;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use keel_registry::{Registry, SlashReason};
use keel_types::{proof_of_order, Address, Hash, Round, Transaction};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// A transaction the leader tried to leave out past the fairness threshold
#[derive(Debug, Clone, Serialize)]
pub struct CensorshipEvent {
    pub round: Round,
    pub leader: Address,
    pub tx_hash: Hash,
    pub age_ms: u64,
    pub priority: f64,
    /// Leader's censorship count after this event
    pub count: u32,
}

/// Misbehavior the sequencer detected but cannot punish itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashRequest {
    pub address: Address,
    pub reason: SlashReason,
    pub round: Round,
}

/// Output of one ordering pass
#[derive(Debug, Clone)]
pub struct SequencedBatch {
    pub round: Round,
    /// Sequencer leader that produced the order
    pub leader: Address,
    pub transactions: Vec<Transaction>,
    pub tx_hashes: Vec<Hash>,
    pub proof_of_order: Hash,
    /// Round reference time the priority ages were measured against
    pub reference_ms: u64,
    pub forced: Vec<Hash>,
    pub slash_requests: Vec<SlashRequest>,
}

impl SequencedBatch {
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }
}

/// Sequencer stats
#[derive(Debug, Clone, Default, Serialize)]
pub struct SequencerStats {
    pub batches: u64,
    pub transactions_sequenced: u64,
    pub forced_inclusions: u64,
    pub censorship_events: u64,
    pub duplicates_rejected: u64,
    pub included: u64,
    pub batches_by_leader: HashMap<String, u64>,
}

/// Sequencer
pub struct Sequencer {
    config: SequencerConfig,
    registry: Arc<Registry>,
    intake: Receiver<Transaction>,
    intake_sender: Sender<Transaction>,
    pool: Mutex<PendingPool>,
    rotation: Mutex<LeaderRotation>,
    policy: RwLock<Arc<dyn InclusionPolicy>>,
    parallel: Option<ParallelOrderer>,
    censorship_log: RwLock<Vec<CensorshipEvent>>,
    stats: RwLock<SequencerStats>,
}

impl Sequencer {
    pub fn new(
        config: SequencerConfig,
        registry: Arc<Registry>,
        sequencers: Vec<Address>,
    ) -> Result<Self, SequencerError> {
        let (intake_sender, intake) = bounded(config.intake_capacity.max(1));
        let parallel = if config.partitions > 1 {
            Some(ParallelOrderer::new(&config)?)
        } else {
            None
        };
        let rotation = LeaderRotation::new(sequencers, &config);

        Ok(Self {
            config,
            registry,
            intake,
            intake_sender,
            pool: Mutex::new(PendingPool::new()),
            rotation: Mutex::new(rotation),
            policy: RwLock::new(Arc::new(IncludeAll)),
            parallel,
            censorship_log: RwLock::new(Vec::new()),
            stats: RwLock::new(SequencerStats::default()),
        })
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    /// Handle for the inbound transaction feed
    pub fn transaction_sender(&self) -> TransactionSender {
        TransactionSender {
            sender: self.intake_sender.clone(),
        }
    }

    /// Replace the leader's local inclusion preference
    pub fn set_policy(&self, policy: Arc<dyn InclusionPolicy>) {
        *self.policy.write() = policy;
    }

    pub fn add_sequencer(&self, address: Address) -> Result<(), SequencerError> {
        self.rotation.lock().add(address)
    }

    /// Insert directly into the pending pool
    pub fn submit(&self, tx: Transaction) -> Result<(), SequencerError> {
        let result = self.pool.lock().insert(tx);
        if result.is_err() {
            self.stats.write().duplicates_rejected += 1;
        }
        result
    }

    /// Move everything queued on the intake channel into the pool
    pub fn drain_intake(&self) -> usize {
        let mut pool = self.pool.lock();
        let mut accepted = 0;
        let mut duplicates = 0;
        loop {
            match self.intake.try_recv() {
                Ok(tx) => match pool.insert(tx) {
                    Ok(()) => accepted += 1,
                    Err(e) => {
                        tracing::debug!("Intake: {}", e);
                        duplicates += 1;
                    }
                },
                Err(TryRecvError::Empty) => break,
                // Sequencer holds a sender, so this only happens on teardown
                Err(TryRecvError::Disconnected) => break,
            }
        }
        if duplicates > 0 {
            self.stats.write().duplicates_rejected += duplicates;
        }
        accepted
    }

    /// Produce the ordered batch for `round`.
    ///
    /// `reference_ms` is the round's fixed reference time and `seed` the round seed; the
    /// output depends only on these, the pending pool and the registry. Nothing leaves the
    /// pool here; call `mark_included` once the batch finalizes.
    pub fn sequence(&self, round: Round, reference_ms: u64, seed: &Hash) -> Result<SequencedBatch, SequencerError> {
        self.drain_intake();

        let mut rotation = self.rotation.lock();
        let leader = rotation.leader_for_round(&self.registry)?;
        let pending = self.pool.lock().pending();
        let policy = self.policy.read().clone();

        let selection = select_batch(&pending, reference_ms, &leader, policy.as_ref(), &self.config);

        let mut slash_requests = Vec::new();
        let mut events = Vec::with_capacity(selection.censored.len());
        for (tx_hash, age_ms, priority) in &selection.censored {
            let count = rotation.record_censorship(&leader);
            tracing::warn!(
                "Censorship detected: leader {} excluded tx {} pending {}ms (priority {:.2}), count {}",
                leader,
                keel_types::short(tx_hash),
                age_ms,
                priority,
                count
            );
            events.push(CensorshipEvent {
                round,
                leader,
                tx_hash: *tx_hash,
                age_ms: *age_ms,
                priority: *priority,
                count,
            });
            if count == rotation.censorship_cap() {
                slash_requests.push(SlashRequest {
                    address: leader,
                    reason: SlashReason::Censorship,
                    round,
                });
            }
        }
        if !slash_requests.is_empty() {
            tracing::warn!("Leader {} reached the censorship cap, rotating", leader);
            if let Err(e) = rotation.rotate(&self.registry) {
                tracing::warn!("Rotation after censorship failed: {}", e);
            }
        }
        drop(rotation);

        let transactions = self.order(selection.transactions, reference_ms, seed);
        let tx_hashes: Vec<Hash> = transactions.iter().map(|tx| tx.hash).collect();
        let proof = proof_of_order(&tx_hashes);

        {
            let mut stats = self.stats.write();
            stats.batches += 1;
            stats.transactions_sequenced += transactions.len() as u64;
            stats.forced_inclusions += selection.forced.len() as u64;
            stats.censorship_events += events.len() as u64;
            *stats.batches_by_leader.entry(leader.to_string()).or_insert(0) += 1;
        }
        self.censorship_log.write().extend(events);

        tracing::debug!(
            "Round {}: leader {} sequenced {} txs ({} forced, {} pending)",
            round,
            leader,
            transactions.len(),
            selection.forced.len(),
            pending.len()
        );

        Ok(SequencedBatch {
            round,
            leader,
            transactions,
            tx_hashes,
            proof_of_order: proof,
            reference_ms,
            forced: selection.forced,
            slash_requests,
        })
    }

    /// Re-derive the order of an already selected batch from its round's reference time and
    /// seed, as a validator checking a proposal would
    pub fn replay(&self, transactions: Vec<Transaction>, reference_ms: u64, seed: &Hash) -> Vec<Hash> {
        self.order(transactions, reference_ms, seed)
            .iter()
            .map(|tx| tx.hash)
            .collect()
    }

    fn order(&self, transactions: Vec<Transaction>, reference_ms: u64, seed: &Hash) -> Vec<Transaction> {
        match &self.parallel {
            Some(orderer) => orderer.order(transactions, seed, reference_ms, &self.config),
            None => sort_by_priority(transactions, reference_ms, &self.config),
        }
    }

    /// Drop finalized transactions from the pending pool
    pub fn mark_included(&self, hashes: &[Hash]) -> usize {
        let removed = self.pool.lock().remove_all(hashes);
        self.stats.write().included += removed as u64;
        removed
    }

    pub fn pending_len(&self) -> usize {
        self.pool.lock().len()
    }

    pub fn is_pending(&self, hash: &Hash) -> bool {
        self.pool.lock().contains(hash)
    }

    pub fn current_leader(&self) -> Option<Address> {
        self.rotation.lock().current()
    }

    pub fn censorship_count(&self, address: &Address) -> u32 {
        self.rotation.lock().censorship_count(address)
    }

    pub fn censorship_log(&self) -> Vec<CensorshipEvent> {
        self.censorship_log.read().clone()
    }

    pub fn stats(&self) -> SequencerStats {
        self.stats.read().clone()
    }
}
