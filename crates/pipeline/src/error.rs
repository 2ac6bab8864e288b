//! Pipeline errors

use keel_consensus::ConsensusError;
use keel_da::DaError;
use keel_registry::RegistryError;
use keel_sequencer::SequencerError;
use keel_settlement::SettlementError;
use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload encoding failed: {0}")]
    Codec(String),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Sequencer error: {0}")]
    Sequencer(#[from] SequencerError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("Data availability error: {0}")]
    Da(#[from] DaError),
}
