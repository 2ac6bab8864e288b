//! Batch store

use crate::batch::{Batch, BatchStatus};
use crate::error::SettlementError;
use dashmap::DashMap;
use keel_types::{unix_millis, Address, BatchId, Hash, Round, StateRoot};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Result of `finalize`
#[derive(Debug, Clone)]
pub enum FinalizeOutcome {
    Finalized(Arc<Batch>),
    /// Already final; nothing changed
    AlreadyFinalized(Arc<Batch>),
}

impl FinalizeOutcome {
    pub fn batch(&self) -> &Arc<Batch> {
        match self {
            FinalizeOutcome::Finalized(b) | FinalizeOutcome::AlreadyFinalized(b) => b,
        }
    }
}

/// Counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SettlementStats {
    pub created: u64,
    pub proposed: usize,
    pub pending: usize,
    pub finalized: usize,
    pub rejected: usize,
}

/// Single-writer repository of batch records.
///
/// Records are replaced, never edited in place, so an `Arc<Batch>` handed out earlier
/// stays a consistent view.
pub struct Settlement {
    batches: DashMap<BatchId, Arc<Batch>>,
    next_id: AtomicU64,
}

impl Settlement {
    pub fn new() -> Self {
        Self {
            batches: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a batch in `Proposed` under a fresh id
    pub fn create_batch(&self, tx_hashes: Vec<Hash>, sequencer: Address, state_root: StateRoot) -> Arc<Batch> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let batch = Arc::new(Batch::new(id, tx_hashes, sequencer, state_root, unix_millis()));
        self.batches.insert(id, batch.clone());
        tracing::debug!("Batch {} created with {} txs", id, batch.len());
        batch
    }

    /// Consensus started voting on the batch in `round`
    pub fn mark_pending(&self, id: BatchId, round: Round) -> Result<Arc<Batch>, SettlementError> {
        self.transition(id, BatchStatus::Pending, |b| b.round = Some(round))
    }

    /// Finalize a pending batch. Finalizing twice is a no-op.
    pub fn finalize(&self, id: BatchId) -> Result<FinalizeOutcome, SettlementError> {
        if let Some(existing) = self.get(id) {
            if existing.is_finalized() {
                return Ok(FinalizeOutcome::AlreadyFinalized(existing));
            }
        }
        let batch = self.transition(id, BatchStatus::Finalized, |_| {})?;
        tracing::info!("Batch {} finalized ({} txs)", id, batch.len());
        Ok(FinalizeOutcome::Finalized(batch))
    }

    /// Reject a batch; its id is never reused. Rejecting twice is a no-op.
    pub fn reject(&self, id: BatchId) -> Result<Arc<Batch>, SettlementError> {
        if let Some(existing) = self.get(id) {
            if existing.status == BatchStatus::Rejected {
                return Ok(existing);
            }
        }
        let batch = self.transition(id, BatchStatus::Rejected, |_| {})?;
        tracing::debug!("Batch {} rejected", id);
        Ok(batch)
    }

    fn transition(
        &self,
        id: BatchId,
        to: BatchStatus,
        update: impl FnOnce(&mut Batch),
    ) -> Result<Arc<Batch>, SettlementError> {
        let mut entry = self.batches.get_mut(&id).ok_or(SettlementError::NotFound(id))?;
        let from = entry.status;
        if !from.can_move_to(to) {
            return Err(SettlementError::InvalidTransition { id, from, to });
        }

        let mut next = Batch::clone(&entry);
        next.status = to;
        update(&mut next);
        let next = Arc::new(next);
        *entry = next.clone();
        Ok(next)
    }

    pub fn get(&self, id: BatchId) -> Option<Arc<Batch>> {
        self.batches.get(&id).map(|b| b.clone())
    }

    /// Commitment of a batch (seeds the following round's proposer selection once final)
    pub fn commitment(&self, id: BatchId) -> Result<Hash, SettlementError> {
        self.get(id).map(|b| b.commitment).ok_or(SettlementError::NotFound(id))
    }

    /// Finalized batches in id order
    pub fn finalized(&self) -> Vec<Arc<Batch>> {
        let mut batches: Vec<Arc<Batch>> = self
            .batches
            .iter()
            .filter(|b| b.is_finalized())
            .map(|b| b.value().clone())
            .collect();
        batches.sort_by_key(|b| b.id);
        batches
    }

    pub fn stats(&self) -> SettlementStats {
        let mut stats = SettlementStats {
            created: self.next_id.load(Ordering::SeqCst) - 1,
            ..Default::default()
        };
        for batch in self.batches.iter() {
            match batch.status {
                BatchStatus::Proposed => stats.proposed += 1,
                BatchStatus::Pending => stats.pending += 1,
                BatchStatus::Finalized => stats.finalized += 1,
                BatchStatus::Rejected => stats.rejected += 1,
            }
        }
        stats
    }
}

impl Default for Settlement {
    fn default() -> Self {
        Self::new()
    }
}
