//! Batch record

use keel_types::{batch_commitment, Address, BatchId, Hash, Round, StateRoot};
use serde::{Deserialize, Serialize};

/// Lifecycle of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    /// Created, not yet under vote
    Proposed,
    /// Consensus is voting on it
    Pending,
    Finalized,
    Rejected,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Finalized | BatchStatus::Rejected)
    }

    /// Whether a transition from `self` to `to` is allowed
    pub fn can_move_to(&self, to: BatchStatus) -> bool {
        matches!(
            (self, to),
            (BatchStatus::Proposed, BatchStatus::Pending)
                | (BatchStatus::Proposed, BatchStatus::Rejected)
                | (BatchStatus::Pending, BatchStatus::Finalized)
                | (BatchStatus::Pending, BatchStatus::Rejected)
        )
    }
}

/// An ordered batch of transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    /// Ordered transaction hashes; immutable once finalized
    pub tx_hashes: Vec<Hash>,
    /// Sequencer leader that produced the order
    pub sequencer: Address,
    pub created_at_ms: u64,
    pub proof_of_order: Hash,
    /// Opaque root from the execution collaborator
    pub state_root: StateRoot,
    /// Commitment over (id, proof of order, state root)
    pub commitment: Hash,
    /// Round that voted on this batch, once pending
    pub round: Option<Round>,
    pub status: BatchStatus,
}

impl Batch {
    pub(crate) fn new(
        id: BatchId,
        tx_hashes: Vec<Hash>,
        sequencer: Address,
        state_root: StateRoot,
        created_at_ms: u64,
    ) -> Self {
        let proof_of_order = keel_types::proof_of_order(&tx_hashes);
        let commitment = batch_commitment(id, &proof_of_order, &state_root);
        Self {
            id,
            tx_hashes,
            sequencer,
            created_at_ms,
            proof_of_order,
            state_root,
            commitment,
            round: None,
            status: BatchStatus::Proposed,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.status == BatchStatus::Finalized
    }

    pub fn len(&self) -> usize {
        self.tx_hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx_hashes.is_empty()
    }
}
