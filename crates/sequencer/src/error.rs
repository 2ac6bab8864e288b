//! Sequencer errors

use keel_registry::RegistryError;
use keel_types::{Address, Hash};
use thiserror::Error;

/// Sequencer errors
#[derive(Error, Debug)]
pub enum SequencerError {
    #[error("Transaction {} already pending", keel_types::short(.0))]
    DuplicateTransaction(Hash),

    #[error("Transaction intake full")]
    IntakeFull,

    #[error("Transaction intake closed")]
    IntakeClosed,

    #[error("No eligible sequencer leader")]
    NoEligibleLeader,

    #[error("Sequencer already in rotation: {0}")]
    AlreadyInRotation(Address),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}
