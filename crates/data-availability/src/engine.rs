//! DA engine - post, sample, verify and reconstruct

use crate::commitment::{payload_commitment, shard_digest};
use crate::custodian::ShardCustodian;
use crate::distribution::assign_shards;
use crate::erasure::ErasureCoder;
use crate::error::DaError;
use crate::sampling::{sample_indices, SampleReport};
use dashmap::DashMap;
use futures::future::join_all;
use keel_types::{Address, BatchId, Hash};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// DA configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaConfig {
    /// `k`
    pub data_shards: usize,
    /// `m`
    pub parity_shards: usize,
    /// Samples per light-client check
    pub light_client_samples: usize,
    /// Minimum success ratio for a block to count as available
    pub availability_threshold: f64,
    /// How long `post_data` waits for custody acknowledgements
    pub ack_timeout_ms: u64,
    /// Per-shard fetch deadline when sampling or reconstructing
    pub fetch_timeout_ms: u64,
}

impl Default for DaConfig {
    fn default() -> Self {
        Self {
            data_shards: 4,
            parity_shards: 4,
            light_client_samples: 20,
            availability_threshold: 0.95,
            ack_timeout_ms: 1_000,
            fetch_timeout_ms: 500,
        }
    }
}

/// A posted block. Immutable once stored.
#[derive(Debug, Clone)]
pub struct DaBlock {
    /// Equal to the batch id
    pub height: BatchId,
    pub payload: Vec<u8>,
    pub data_shards: Vec<Vec<u8>>,
    pub parity_shards: Vec<Vec<u8>>,
    pub shard_size: usize,
    pub shard_digests: Vec<Hash>,
    pub commitment: Hash,
    /// Custodian of each shard, by shard index
    pub assignment: Vec<Address>,
    /// Shards acknowledged by their custodian at post time
    pub acknowledged: usize,
    /// At least `k` shards acknowledged
    pub available: bool,
}

impl DaBlock {
    pub fn total_shards(&self) -> usize {
        self.data_shards.len() + self.parity_shards.len()
    }
}

/// Engine counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct DaStats {
    pub blocks_posted: u64,
    pub blocks_available: u64,
    pub sample_checks: u64,
    pub sample_checks_passed: u64,
    pub samples_requested: u64,
    pub samples_succeeded: u64,
    pub reconstructions: u64,
    pub reconstruction_failures: u64,
    pub bad_shards: u64,
}

#[derive(Default)]
struct Counters {
    blocks_posted: AtomicU64,
    blocks_available: AtomicU64,
    sample_checks: AtomicU64,
    sample_checks_passed: AtomicU64,
    samples_requested: AtomicU64,
    samples_succeeded: AtomicU64,
    reconstructions: AtomicU64,
    reconstruction_failures: AtomicU64,
    bad_shards: AtomicU64,
}

/// Data availability engine
pub struct DaEngine {
    config: DaConfig,
    coder: ErasureCoder,
    /// Custodians in address order
    custodians: RwLock<BTreeMap<Address, Arc<dyn ShardCustodian>>>,
    blocks: DashMap<BatchId, Arc<DaBlock>>,
    /// Custodians caught serving shards that do not match their digest
    bad_custodians: DashMap<Address, u64>,
    counters: Counters,
}

impl DaEngine {
    pub fn new(config: DaConfig) -> Result<Self, DaError> {
        let coder = ErasureCoder::new(config.data_shards, config.parity_shards)?;
        if !(0.0..=1.0).contains(&config.availability_threshold) {
            return Err(DaError::InvalidParameters(format!(
                "availability threshold {} outside [0, 1]",
                config.availability_threshold
            )));
        }
        Ok(Self {
            config,
            coder,
            custodians: RwLock::new(BTreeMap::new()),
            blocks: DashMap::new(),
            bad_custodians: DashMap::new(),
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &DaConfig {
        &self.config
    }

    pub fn coder(&self) -> &ErasureCoder {
        &self.coder
    }

    /// Register a custodian; blocks posted afterwards include it in their assignment
    pub fn add_custodian(&self, custodian: Arc<dyn ShardCustodian>) {
        let id = custodian.id();
        self.custodians.write().insert(id, custodian);
        tracing::debug!("DA custodian registered: {}", id);
    }

    pub fn remove_custodian(&self, id: &Address) -> bool {
        self.custodians.write().remove(id).is_some()
    }

    pub fn custodians(&self) -> Vec<Address> {
        self.custodians.read().keys().copied().collect()
    }

    fn custodian(&self, id: &Address) -> Option<Arc<dyn ShardCustodian>> {
        self.custodians.read().get(id).cloned()
    }

    /// Erasure-code `payload`, commit to it and hand shards to their custodians.
    ///
    /// Waits for acknowledgements up to the ack timeout; the block is recorded either way
    /// and its `available` flag says whether at least `k` shards were acknowledged.
    pub async fn post_data(&self, height: BatchId, payload: Vec<u8>) -> Result<Arc<DaBlock>, DaError> {
        if self.blocks.contains_key(&height) {
            return Err(DaError::DuplicateHeight(height));
        }
        let custodian_ids = self.custodians();
        if custodian_ids.is_empty() {
            return Err(DaError::NoCustodians);
        }

        let k = self.coder.data_shards();
        let encoded = self.coder.encode(&payload)?;
        let commitment = payload_commitment(&payload);
        let shard_digests: Vec<Hash> = encoded
            .shards
            .iter()
            .enumerate()
            .map(|(i, s)| shard_digest(i, s))
            .collect();
        let assignment = assign_shards(&custodian_ids, height, encoded.shards.len());

        let ack_timeout = Duration::from_millis(self.config.ack_timeout_ms);
        let stores = encoded.shards.iter().enumerate().map(|(index, shard)| {
            let custodian = self.custodian(&assignment[index]);
            let shard = shard.clone();
            async move {
                let Some(custodian) = custodian else {
                    return false;
                };
                match tokio::time::timeout(ack_timeout, custodian.store(height, index, shard)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        tracing::debug!("Shard {} of block {} not stored: {}", index, height, e);
                        false
                    }
                    Err(_) => {
                        tracing::debug!("Shard {} of block {} ack timed out", index, height);
                        false
                    }
                }
            }
        });
        let acknowledged = join_all(stores).await.into_iter().filter(|ok| *ok).count();
        let available = acknowledged >= k;

        let mut shards = encoded.shards;
        let parity_shards = shards.split_off(k);
        let block = Arc::new(DaBlock {
            height,
            payload,
            data_shards: shards,
            parity_shards,
            shard_size: encoded.shard_size,
            shard_digests,
            commitment,
            assignment,
            acknowledged,
            available,
        });
        self.blocks.insert(height, block.clone());

        self.counters.blocks_posted.fetch_add(1, Ordering::Relaxed);
        if available {
            self.counters.blocks_available.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                "DA block {} posted: {} bytes, {}/{} shards acknowledged",
                height,
                block.payload.len(),
                acknowledged,
                block.total_shards()
            );
        } else {
            tracing::warn!(
                "DA block {} posted but only {}/{} shards acknowledged (need {})",
                height,
                acknowledged,
                block.total_shards(),
                k
            );
        }
        Ok(block)
    }

    /// Light-client availability check: `sample_count` random shard queries
    pub async fn sample(&self, height: BatchId, sample_count: usize) -> Result<bool, DaError> {
        Ok(self.sample_report(height, sample_count).await?.available)
    }

    pub async fn sample_report(&self, height: BatchId, sample_count: usize) -> Result<SampleReport, DaError> {
        let block = self.block(height)?;
        let indices = {
            let mut rng = rand::thread_rng();
            sample_indices(&mut rng, block.total_shards(), sample_count)
        };
        Ok(self.probe(&block, indices).await)
    }

    /// Sampling with the configured light-client sample count
    pub async fn light_client_sample(&self, height: BatchId) -> Result<SampleReport, DaError> {
        self.sample_report(height, self.config.light_client_samples).await
    }

    /// Sampling with a caller-supplied RNG (reproducible checks)
    pub async fn sample_with_rng<R: Rng + ?Sized>(
        &self,
        height: BatchId,
        sample_count: usize,
        rng: &mut R,
    ) -> Result<SampleReport, DaError> {
        let block = self.block(height)?;
        let indices = sample_indices(rng, block.total_shards(), sample_count);
        Ok(self.probe(&block, indices).await)
    }

    async fn probe(&self, block: &DaBlock, indices: Vec<usize>) -> SampleReport {
        let fetches = indices.iter().map(|&index| self.fetch_verified(block, index));
        let succeeded = join_all(fetches).await.into_iter().filter(|s| s.is_some()).count();

        let report = SampleReport::new(block.height, indices.len(), succeeded, self.config.availability_threshold);
        self.counters.sample_checks.fetch_add(1, Ordering::Relaxed);
        self.counters
            .samples_requested
            .fetch_add(report.requested as u64, Ordering::Relaxed);
        self.counters
            .samples_succeeded
            .fetch_add(report.succeeded as u64, Ordering::Relaxed);
        if report.available {
            self.counters.sample_checks_passed.fetch_add(1, Ordering::Relaxed);
        }

        tracing::debug!(
            "Sampled block {}: {}/{} ({:.2}) available={}",
            block.height,
            report.succeeded,
            report.requested,
            report.confidence,
            report.available
        );
        report
    }

    /// Fetch shard `index` from its custodian; anything not matching its digest is missing
    async fn fetch_verified(&self, block: &DaBlock, index: usize) -> Option<Vec<u8>> {
        let owner = *block.assignment.get(index)?;
        let custodian = self.custodian(&owner)?;
        let timeout = Duration::from_millis(self.config.fetch_timeout_ms);
        let shard = tokio::time::timeout(timeout, custodian.fetch(block.height, index))
            .await
            .ok()
            .flatten()?;

        if shard_digest(index, &shard) != block.shard_digests[index] {
            self.counters.bad_shards.fetch_add(1, Ordering::Relaxed);
            *self.bad_custodians.entry(owner).or_insert(0) += 1;
            tracing::warn!("Custodian {} served a bad shard {} for block {}", owner, index, block.height);
            return None;
        }
        Some(shard)
    }

    /// Recompute the commitment over `data` and compare with the stored one
    pub fn verify_commitment(&self, height: BatchId, data: &[u8]) -> Result<bool, DaError> {
        let block = self.block(height)?;
        Ok(payload_commitment(data) == block.commitment)
    }

    /// Rebuild the payload from whatever custodians can serve.
    ///
    /// Fewer than `k` good shards is an explicit `Unavailable` error.
    pub async fn reconstruct(&self, height: BatchId) -> Result<Vec<u8>, DaError> {
        let block = self.block(height)?;
        self.counters.reconstructions.fetch_add(1, Ordering::Relaxed);

        let fetches = (0..block.total_shards()).map(|index| self.fetch_verified(&block, index));
        let shards: Vec<Option<Vec<u8>>> = join_all(fetches).await;

        let payload = match self.coder.reconstruct(&shards) {
            Ok(payload) => payload,
            Err(DaError::InsufficientShards { available, required }) => {
                self.counters.reconstruction_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Block {} unavailable: {} of {} required shards retrievable",
                    height,
                    available,
                    required
                );
                return Err(DaError::Unavailable {
                    height,
                    available,
                    required,
                });
            }
            Err(e) => {
                self.counters.reconstruction_failures.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        if payload_commitment(&payload) != block.commitment {
            self.counters.reconstruction_failures.fetch_add(1, Ordering::Relaxed);
            return Err(DaError::CommitmentMismatch(height));
        }
        Ok(payload)
    }

    fn block(&self, height: BatchId) -> Result<Arc<DaBlock>, DaError> {
        self.blocks
            .get(&height)
            .map(|b| b.clone())
            .ok_or(DaError::UnknownHeight(height))
    }

    pub fn get(&self, height: BatchId) -> Option<Arc<DaBlock>> {
        self.blocks.get(&height).map(|b| b.clone())
    }

    /// Custodians that served altered shards since the last call, with counts
    pub fn take_bad_custodians(&self) -> Vec<(Address, u64)> {
        let mut bad: Vec<(Address, u64)> = self.bad_custodians.iter().map(|e| (*e.key(), *e.value())).collect();
        bad.sort();
        for (addr, _) in &bad {
            self.bad_custodians.remove(addr);
        }
        bad
    }

    pub fn stats(&self) -> DaStats {
        let c = &self.counters;
        DaStats {
            blocks_posted: c.blocks_posted.load(Ordering::Relaxed),
            blocks_available: c.blocks_available.load(Ordering::Relaxed),
            sample_checks: c.sample_checks.load(Ordering::Relaxed),
            sample_checks_passed: c.sample_checks_passed.load(Ordering::Relaxed),
            samples_requested: c.samples_requested.load(Ordering::Relaxed),
            samples_succeeded: c.samples_succeeded.load(Ordering::Relaxed),
            reconstructions: c.reconstructions.load(Ordering::Relaxed),
            reconstruction_failures: c.reconstruction_failures.load(Ordering::Relaxed),
            bad_shards: c.bad_shards.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custodian::InMemoryCustodian;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn engine(config: DaConfig, custodians: usize) -> (DaEngine, Vec<Arc<InMemoryCustodian>>) {
        let engine = DaEngine::new(config).unwrap();
        let custodians: Vec<Arc<InMemoryCustodian>> = (0..custodians)
            .map(|i| Arc::new(InMemoryCustodian::new(Address::from_label(&format!("custodian-{}", i)))))
            .collect();
        for c in &custodians {
            engine.add_custodian(c.clone());
        }
        (engine, custodians)
    }

    fn custodian_of<'a>(
        custodians: &'a [Arc<InMemoryCustodian>],
        block: &DaBlock,
        index: usize,
    ) -> &'a InMemoryCustodian {
        let owner = block.assignment[index];
        custodians.iter().find(|c| c.id() == owner).unwrap()
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    #[tokio::test]
    async fn test_post_and_reconstruct() {
        let (engine, custodians) = engine(DaConfig::default(), 8);
        let data = payload(10_000);
        let block = engine.post_data(1, data.clone()).await.unwrap();

        assert!(block.available);
        assert_eq!(block.acknowledged, 8);
        assert_eq!(block.data_shards.len(), 4);
        assert_eq!(block.parity_shards.len(), 4);
        assert_eq!(custodians.iter().map(|c| c.stored()).sum::<usize>(), 8);
        assert_eq!(engine.reconstruct(1).await.unwrap(), data);
        assert!(engine.verify_commitment(1, &data).unwrap());
        assert!(!engine.verify_commitment(1, &data[1..]).unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_heights() {
        let (engine, _) = engine(DaConfig::default(), 4);
        engine.post_data(1, payload(10)).await.unwrap();
        assert_eq!(engine.post_data(1, payload(10)).await.unwrap_err(), DaError::DuplicateHeight(1));
        assert_eq!(engine.verify_commitment(2, b"x").unwrap_err(), DaError::UnknownHeight(2));
        assert_eq!(engine.reconstruct(2).await.unwrap_err(), DaError::UnknownHeight(2));
    }

    #[tokio::test]
    async fn test_no_custodians() {
        let (engine, _) = engine(DaConfig::default(), 0);
        assert_eq!(engine.post_data(1, payload(10)).await.unwrap_err(), DaError::NoCustodians);
    }

    #[tokio::test]
    async fn test_offline_custodians_reduce_acks() {
        let (engine, custodians) = engine(DaConfig::default(), 8);
        for c in &custodians[..5] {
            c.set_online(false);
        }
        let block = engine.post_data(1, payload(100)).await.unwrap();
        assert_eq!(block.acknowledged, 3);
        assert!(!block.available);
        assert!(matches!(engine.reconstruct(1).await, Err(DaError::Unavailable { available: 3, required: 4, .. })));
    }

    #[tokio::test]
    async fn test_corrupted_shard_counts_as_missing() {
        let (engine, custodians) = engine(DaConfig::default(), 8);
        let data = payload(2_000);
        let block = engine.post_data(3, data.clone()).await.unwrap();

        for index in [0, 1, 2, 3] {
            custodian_of(&custodians, &block, index).corrupt_shard(3, index);
        }
        assert_eq!(engine.reconstruct(3).await.unwrap(), data);

        custodian_of(&custodians, &block, 4).drop_shard(3, 4);
        assert!(matches!(engine.reconstruct(3).await, Err(DaError::Unavailable { .. })));

        let bad = engine.take_bad_custodians();
        assert_eq!(bad.iter().map(|(_, n)| n).sum::<u64>(), 8);
        assert!(engine.take_bad_custodians().is_empty());
    }

    #[tokio::test]
    async fn test_full_availability_passes_sampling() {
        let (engine, _) = engine(DaConfig::default(), 8);
        engine.post_data(1, payload(1_000)).await.unwrap();

        let report = engine.light_client_sample(1).await.unwrap();
        assert_eq!(report.requested, 20);
        assert_eq!(report.succeeded, 20);
        assert!(report.available);
        assert!(engine.sample(1, 5).await.unwrap());
        assert_eq!(engine.stats().sample_checks, 2);
    }

    #[tokio::test]
    async fn test_rejection_rate_grows_with_loss() {
        let config = DaConfig {
            data_shards: 16,
            parity_shards: 16,
            ..Default::default()
        };
        let trials = 200;
        let mut rng = StdRng::seed_from_u64(2024);
        let mut rejection_rates = Vec::new();

        for (height, lost) in [0usize, 2, 4, 8, 16].into_iter().enumerate() {
            let height = height as BatchId + 1;
            let (engine, custodians) = engine(config.clone(), 32);
            let block = engine.post_data(height, payload(4_096)).await.unwrap();
            for index in 0..lost {
                custodian_of(&custodians, &block, index).drop_shard(height, index);
            }

            let mut rejected = 0;
            for _ in 0..trials {
                let report = engine.sample_with_rng(height, 20, &mut rng).await.unwrap();
                if !report.available {
                    rejected += 1;
                }
            }
            rejection_rates.push(rejected as f64 / trials as f64);
        }

        assert_eq!(rejection_rates[0], 0.0);
        assert!(rejection_rates.windows(2).all(|w| w[0] <= w[1]), "{:?}", rejection_rates);
        // half the shards gone: essentially always rejected
        assert!(rejection_rates[4] > 0.99);
    }
}
