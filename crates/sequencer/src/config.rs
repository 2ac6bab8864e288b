//! Sequencer configuration

use serde::{Deserialize, Serialize};

/// Sequencer tunables. Every validator replaying a round must use the same values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Weight of the value component in the priority score
    pub value_weight: f64,
    /// Weight of the age component in the priority score
    pub age_weight: f64,
    /// Value at which the value component saturates
    pub value_scale: u64,
    /// Age (ms) at which the age component saturates
    pub age_scale_ms: u64,
    /// Pending longer than this (ms) makes a transaction a censorship candidate
    pub censorship_age_ms: u64,
    /// ...if its priority is also above this
    pub censorship_priority: f64,
    /// Leaders whose censorship count reaches this lose eligibility and are slashed
    pub censorship_cap: u32,
    /// Leaders need reputation strictly above this
    pub leader_min_reputation: u32,
    /// Maximum transactions per batch at normal load (forced inclusions always fit)
    pub max_batch_txs: usize,
    /// Scale the batch limit with the pending pool size
    pub adaptive_batch: bool,
    /// More pending transactions than this raises the limit to `high_load_batch_txs`
    pub high_load_pending: usize,
    pub high_load_batch_txs: usize,
    /// Fewer pending transactions than this lowers the limit to `low_load_batch_txs`
    pub low_load_pending: usize,
    pub low_load_batch_txs: usize,
    /// Rotate leadership after this many rounds
    pub rotate_every_rounds: u64,
    /// Partition count for parallel ordering; 1 orders sequentially
    pub partitions: usize,
    /// Worker threads for parallel ordering
    pub worker_threads: usize,
    /// Capacity of the inbound transaction channel
    pub intake_capacity: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            value_weight: 0.6,
            age_weight: 0.4,
            value_scale: 1_000_000,
            age_scale_ms: 60_000,
            censorship_age_ms: 30_000,
            censorship_priority: 0.8,
            censorship_cap: 10,
            leader_min_reputation: 50,
            max_batch_txs: 10_000,
            adaptive_batch: true,
            high_load_pending: 50_000,
            high_load_batch_txs: 20_000,
            low_load_pending: 1_000,
            low_load_batch_txs: 2_000,
            rotate_every_rounds: 5,
            partitions: 1,
            worker_threads: 4,
            intake_capacity: 4096,
        }
    }
}

impl SequencerConfig {
    /// Batch limit for a pool holding `pending` transactions
    pub fn batch_limit(&self, pending: usize) -> usize {
        if !self.adaptive_batch {
            return self.max_batch_txs;
        }
        if pending > self.high_load_pending {
            self.high_load_batch_txs
        } else if pending < self.low_load_pending {
            self.low_load_batch_txs
        } else {
            self.max_batch_txs
        }
    }
}
