//! Pending transaction pool and its bounded intake

use crate::error::SequencerError;
use crossbeam_channel::{Sender, TrySendError};
use keel_types::{Hash, Transaction};
use std::collections::BTreeMap;

/// Handle for producers submitting candidate transactions
#[derive(Clone)]
pub struct TransactionSender {
    pub(crate) sender: Sender<Transaction>,
}

impl TransactionSender {
    /// Submit a transaction without blocking
    pub fn send(&self, tx: Transaction) -> Result<(), SequencerError> {
        self.sender.try_send(tx).map_err(|e| match e {
            TrySendError::Full(_) => SequencerError::IntakeFull,
            TrySendError::Disconnected(_) => SequencerError::IntakeClosed,
        })
    }
}

/// Transactions waiting for a finalized batch, keyed by hash
#[derive(Debug, Default)]
pub struct PendingPool {
    txs: BTreeMap<Hash, Transaction>,
}

impl PendingPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tx: Transaction) -> Result<(), SequencerError> {
        if self.txs.contains_key(&tx.hash) {
            return Err(SequencerError::DuplicateTransaction(tx.hash));
        }
        self.txs.insert(tx.hash, tx);
        Ok(())
    }

    /// Remove transactions that made it into a finalized batch
    pub fn remove_all(&mut self, hashes: &[Hash]) -> usize {
        hashes.iter().filter(|h| self.txs.remove(*h).is_some()).count()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.txs.contains_key(hash)
    }

    /// Pending transactions in hash order
    pub fn pending(&self) -> Vec<Transaction> {
        self.txs.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::Address;

    fn tx(nonce: u64) -> Transaction {
        Transaction::new(Address::from_label("a"), Address::from_label("b"), 1, nonce, 0)
    }

    #[test]
    fn test_rejects_duplicates() {
        let mut pool = PendingPool::new();
        pool.insert(tx(1)).unwrap();
        assert!(matches!(pool.insert(tx(1)), Err(SequencerError::DuplicateTransaction(_))));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_remove_all() {
        let mut pool = PendingPool::new();
        for i in 0..5 {
            pool.insert(tx(i)).unwrap();
        }
        let gone = [tx(0).hash, tx(3).hash, [0u8; 32]];
        assert_eq!(pool.remove_all(&gone), 2);
        assert_eq!(pool.len(), 3);
        assert!(!pool.contains(&tx(0).hash));
    }

    #[test]
    fn test_bounded_intake() {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let handle = TransactionSender { sender };
        handle.send(tx(1)).unwrap();
        assert!(matches!(handle.send(tx(2)), Err(SequencerError::IntakeFull)));
        drop(receiver);
        assert!(matches!(handle.send(tx(3)), Err(SequencerError::IntakeClosed)));
    }
}
