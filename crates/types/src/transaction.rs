//! Candidate transactions

use crate::{Address, Hash};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// A candidate transaction as supplied by the inbound feed.
///
/// Priority is not stored here; the sequencer recomputes it on every ordering pass
/// against that pass's reference time.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction hash
    pub hash: Hash,
    pub sender: Address,
    pub recipient: Address,
    pub value: u64,
    /// Submission time (unix millis)
    pub submitted_at_ms: u64,
}

impl Transaction {
    /// Build a transaction whose hash commits to all of its fields plus a nonce
    pub fn new(sender: Address, recipient: Address, value: u64, nonce: u64, submitted_at_ms: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(sender.as_bytes());
        hasher.update(recipient.as_bytes());
        hasher.update(&value.to_le_bytes());
        hasher.update(&nonce.to_le_bytes());
        hasher.update(&submitted_at_ms.to_le_bytes());

        Self {
            hash: *hasher.finalize().as_bytes(),
            sender,
            recipient,
            value,
            submitted_at_ms,
        }
    }

    /// Milliseconds this transaction has been pending at `reference_ms`
    pub fn age_ms(&self, reference_ms: u64) -> u64 {
        reference_ms.saturating_sub(self.submitted_at_ms)
    }
}
