//! Data availability errors

use keel_types::{Address, BatchId};
use thiserror::Error;

/// Data availability errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DaError {
    #[error("Invalid erasure parameters: {0}")]
    InvalidParameters(String),

    #[error("Erasure coding failed: {0}")]
    Coding(String),

    #[error("Not enough shards: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    #[error("Block {height} unavailable: {available} of {required} required shards retrievable")]
    Unavailable {
        height: BatchId,
        available: usize,
        required: usize,
    },

    #[error("Unknown DA height: {0}")]
    UnknownHeight(BatchId),

    #[error("DA height already posted: {0}")]
    DuplicateHeight(BatchId),

    #[error("No shard custodians registered")]
    NoCustodians,

    #[error("Custodian offline: {0}")]
    CustodianOffline(Address),

    #[error("Invalid shard: {0}")]
    InvalidShard(String),

    #[error("Reconstructed payload for block {0} does not match its commitment")]
    CommitmentMismatch(BatchId),
}
