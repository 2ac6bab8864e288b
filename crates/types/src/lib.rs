//! Shared types for the keel finality pipeline
//!
//! Every other crate in the workspace speaks in these types:
//! - validator addresses and 32-byte hashes
//! - candidate transactions fed in by the producer collaborator
//! - lifecycle events emitted to staking, monitoring and indexing collaborators

pub mod address;
pub mod events;
pub mod hash;
pub mod transaction;

pub use address::Address;
pub use events::{FinalizedBatchEvent, ValidatorEvent};
pub use hash::{batch_commitment, proof_of_order, short, Hash, ZERO_HASH};
pub use transaction::Transaction;

/// Consensus round number
pub type Round = u64;

/// Monotonic batch identifier (also the DA block height)
pub type BatchId = u64;

/// Opaque state root returned by the execution collaborator
pub type StateRoot = Hash;

/// Wall-clock unix time in milliseconds.
///
/// Only for log-facing timestamps (slash records, batch creation). Anything that must be
/// replayed identically by every validator takes an explicit reference time instead.
pub fn unix_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
