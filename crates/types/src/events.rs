//! Outbound events consumed by collaborators outside the core

use crate::{Address, BatchId, Hash, StateRoot};
use serde::{Deserialize, Serialize};

/// Emitted by the registry on every validator mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorEvent {
    pub address: Address,
    pub stake: u64,
    pub reputation: u32,
    pub active: bool,
}

/// Emitted by the coordinator when a round completes with a finalized batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizedBatchEvent {
    pub batch_id: BatchId,
    pub tx_hashes: Vec<Hash>,
    pub state_root: StateRoot,
    pub da_commitment: Hash,
    /// Fraction of successful availability samples, `None` if sampling was skipped
    pub availability_confidence: Option<f64>,
}
