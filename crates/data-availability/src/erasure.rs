//! Systematic Reed-Solomon erasure coding
//!
//! The payload is framed with an 8-byte big-endian length, padded to `k` equal even-sized
//! shards, and extended with `m` parity shards. Shards `0..k` are the data itself.

use crate::error::DaError;
use reed_solomon_simd::{ReedSolomonDecoder, ReedSolomonEncoder};

const LENGTH_PREFIX: usize = 8;

/// Data + parity shards of one payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    /// `k` data shards followed by `m` parity shards
    pub shards: Vec<Vec<u8>>,
    pub shard_size: usize,
}

impl EncodedPayload {
    pub fn data_shards(&self, k: usize) -> &[Vec<u8>] {
        &self.shards[..k]
    }

    pub fn parity_shards(&self, k: usize) -> &[Vec<u8>] {
        &self.shards[k..]
    }
}

/// Encoder/decoder for a fixed (k, m)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErasureCoder {
    data_shards: usize,
    parity_shards: usize,
}

impl ErasureCoder {
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self, DaError> {
        if data_shards == 0 || parity_shards == 0 {
            return Err(DaError::InvalidParameters(format!(
                "need at least one data and one parity shard, got k={} m={}",
                data_shards, parity_shards
            )));
        }
        if !ReedSolomonEncoder::supports(data_shards, parity_shards) {
            return Err(DaError::InvalidParameters(format!(
                "unsupported shard counts k={} m={}",
                data_shards, parity_shards
            )));
        }
        Ok(Self {
            data_shards,
            parity_shards,
        })
    }

    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Parity overhead `m / k`
    pub fn redundancy(&self) -> f64 {
        self.parity_shards as f64 / self.data_shards as f64
    }

    pub fn encode(&self, payload: &[u8]) -> Result<EncodedPayload, DaError> {
        let k = self.data_shards;

        let mut framed = Vec::with_capacity(LENGTH_PREFIX + payload.len());
        framed.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        framed.extend_from_slice(payload);

        // reed-solomon-simd requires an even shard size
        let mut shard_size = framed.len().div_ceil(k);
        if shard_size % 2 != 0 {
            shard_size += 1;
        }
        framed.resize(shard_size * k, 0);

        let mut encoder = ReedSolomonEncoder::new(k, self.parity_shards, shard_size)
            .map_err(|e| DaError::Coding(e.to_string()))?;
        for chunk in framed.chunks(shard_size) {
            encoder
                .add_original_shard(chunk)
                .map_err(|e| DaError::Coding(e.to_string()))?;
        }
        let result = encoder.encode().map_err(|e| DaError::Coding(e.to_string()))?;

        let mut shards: Vec<Vec<u8>> = framed.chunks(shard_size).map(|c| c.to_vec()).collect();
        shards.extend(result.recovery_iter().map(|s| s.to_vec()));

        Ok(EncodedPayload { shards, shard_size })
    }

    /// Rebuild the payload from any `k` shards. `shards[i]` is shard `i` if present.
    ///
    /// Fewer than `k` present shards is an explicit `InsufficientShards` error; partial
    /// data is never returned.
    pub fn reconstruct(&self, shards: &[Option<Vec<u8>>]) -> Result<Vec<u8>, DaError> {
        let k = self.data_shards;
        if shards.len() != self.total_shards() {
            return Err(DaError::InvalidShard(format!(
                "expected {} shard slots, got {}",
                self.total_shards(),
                shards.len()
            )));
        }

        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < k {
            return Err(DaError::InsufficientShards {
                available,
                required: k,
            });
        }

        let shard_size = shards.iter().flatten().map(|s| s.len()).next().unwrap_or(0);
        if shard_size == 0 || shards.iter().flatten().any(|s| s.len() != shard_size) {
            return Err(DaError::InvalidShard("inconsistent shard sizes".to_string()));
        }

        let mut originals: Vec<Option<Vec<u8>>> = shards[..k].to_vec();
        if originals.iter().any(|s| s.is_none()) {
            let mut decoder = ReedSolomonDecoder::new(k, self.parity_shards, shard_size)
                .map_err(|e| DaError::Coding(e.to_string()))?;
            for (index, shard) in shards.iter().enumerate() {
                let Some(shard) = shard else { continue };
                let added = if index < k {
                    decoder.add_original_shard(index, shard)
                } else {
                    decoder.add_recovery_shard(index - k, shard)
                };
                added.map_err(|e| DaError::Coding(e.to_string()))?;
            }
            let result = decoder.decode().map_err(|e| DaError::Coding(e.to_string()))?;
            for (index, shard) in result.restored_original_iter() {
                originals[index] = Some(shard.to_vec());
            }
        }

        let mut framed = Vec::with_capacity(shard_size * k);
        for shard in originals {
            let shard = shard.ok_or_else(|| DaError::Coding("decoder left a data shard missing".to_string()))?;
            framed.extend_from_slice(&shard);
        }

        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&framed[..LENGTH_PREFIX]);
        let len = u64::from_be_bytes(prefix) as usize;
        if len > framed.len() - LENGTH_PREFIX {
            return Err(DaError::InvalidShard(format!("framed length {} exceeds shard capacity", len)));
        }
        Ok(framed[LENGTH_PREFIX..LENGTH_PREFIX + len].to_vec())
    }
}
