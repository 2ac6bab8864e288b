//! Settlement errors

use crate::batch::BatchStatus;
use keel_types::BatchId;
use thiserror::Error;

/// Settlement errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    #[error("Batch not found: {0}")]
    NotFound(BatchId),

    #[error("Batch {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: BatchId,
        from: BatchStatus,
        to: BatchStatus,
    },

    #[error("Execution failed: {0}")]
    Execution(String),
}
