//! Partitioned ordering on a fixed worker pool
//!
//! Each transaction maps to `blake3(round seed || tx hash) mod partitions`, so the same
//! transaction lands in the same partition for a given round on every node. Partitions are
//! ordered independently by the priority rule and concatenated in partition-index order.

use crate::config::SequencerConfig;
use crate::error::SequencerError;
use crate::priority::sort_by_priority;
use keel_types::{Hash, Transaction};
use rayon::prelude::*;

/// Partition index for a transaction in the round identified by `seed`
pub fn partition_of(seed: &Hash, tx_hash: &Hash, partitions: usize) -> usize {
    if partitions <= 1 {
        return 0;
    }
    let mut hasher = blake3::Hasher::new();
    hasher.update(seed);
    hasher.update(tx_hash);
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    (u64::from_le_bytes(prefix) % partitions as u64) as usize
}

/// Orders partitions concurrently on a dedicated rayon pool
pub struct ParallelOrderer {
    pool: rayon::ThreadPool,
    partitions: usize,
}

impl ParallelOrderer {
    pub fn new(config: &SequencerConfig) -> Result<Self, SequencerError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads.max(1))
            .thread_name(|i| format!("keel-order-{}", i))
            .build()
            .map_err(|e| SequencerError::ThreadPool(e.to_string()))?;

        tracing::debug!(
            "Parallel ordering: {} partitions on {} threads",
            config.partitions,
            config.worker_threads.max(1)
        );

        Ok(Self {
            pool,
            partitions: config.partitions.max(1),
        })
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Split by partition key, sort each partition, concatenate by index
    pub fn order(
        &self,
        txs: Vec<Transaction>,
        seed: &Hash,
        reference_ms: u64,
        config: &SequencerConfig,
    ) -> Vec<Transaction> {
        let mut buckets: Vec<Vec<Transaction>> = vec![Vec::new(); self.partitions];
        for tx in txs {
            let idx = partition_of(seed, &tx.hash, self.partitions);
            buckets[idx].push(tx);
        }

        let ordered: Vec<Vec<Transaction>> = self.pool.install(|| {
            buckets
                .into_par_iter()
                .map(|bucket| sort_by_priority(bucket, reference_ms, config))
                .collect()
        });

        ordered.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::Address;

    fn txs(n: u64) -> Vec<Transaction> {
        (0..n)
            .map(|i| Transaction::new(Address::from_label("a"), Address::from_label("b"), (i * 7_919) % 1_000_000, i, 1_000))
            .collect()
    }

    fn orderer(partitions: usize) -> ParallelOrderer {
        let config = SequencerConfig {
            partitions,
            worker_threads: 3,
            ..Default::default()
        };
        ParallelOrderer::new(&config).unwrap()
    }

    #[test]
    fn test_partition_is_stable_per_round() {
        let hash = [42u8; 32];
        let seed = [1u8; 32];
        let p = partition_of(&seed, &hash, 8);
        for _ in 0..10 {
            assert_eq!(partition_of(&seed, &hash, 8), p);
        }
        assert!(p < 8);
        assert_eq!(partition_of(&seed, &hash, 1), 0);
    }

    #[test]
    fn test_order_independent_of_arrival() {
        let config = SequencerConfig::default();
        let seed = [3u8; 32];
        let orderer = orderer(4);

        let forward = orderer.order(txs(500), &seed, 60_000, &config);
        let mut shuffled = txs(500);
        shuffled.reverse();
        shuffled.rotate_left(123);

        assert_eq!(orderer.order(shuffled, &seed, 60_000, &config), forward);
        assert_eq!(forward.len(), 500);
    }

    #[test]
    fn test_concatenates_by_partition_index() {
        let config = SequencerConfig::default();
        let seed = [5u8; 32];
        let ordered = orderer(4).order(txs(200), &seed, 60_000, &config);

        let indices: Vec<usize> = ordered.iter().map(|tx| partition_of(&seed, &tx.hash, 4)).collect();
        assert!(indices.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_single_partition_matches_sequential() {
        let config = SequencerConfig::default();
        let sequential = sort_by_priority(txs(100), 60_000, &config);
        assert_eq!(orderer(1).order(txs(100), &[0u8; 32], 60_000, &config), sequential);
    }
}
