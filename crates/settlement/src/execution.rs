//! Execution collaborator seam

use crate::error::SettlementError;
use async_trait::async_trait;
use keel_types::{StateRoot, Transaction};

/// Executes an ordered batch and returns the resulting state root.
///
/// The root is opaque to the finality pipeline; it is only carried and committed to.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(&self, transactions: &[Transaction]) -> Result<StateRoot, SettlementError>;
}

/// Stand-in executor: the root is a digest of the ordered hashes
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderExecutor;

#[async_trait]
impl ExecutionEngine for PlaceholderExecutor {
    async fn execute(&self, transactions: &[Transaction]) -> Result<StateRoot, SettlementError> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"keel/placeholder-state/v1");
        for tx in transactions {
            hasher.update(&tx.hash);
        }
        Ok(*hasher.finalize().as_bytes())
    }
}
