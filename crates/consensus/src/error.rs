//! Consensus errors

use keel_registry::RegistryError;
use keel_types::BatchId;
use thiserror::Error;

/// Consensus errors
#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Batch {0} is already finalized")]
    AlreadyFinalized(BatchId),

    #[error("Message codec error: {0}")]
    Codec(String),

    #[error("Vote channel closed")]
    ChannelClosed,
}
