//! Availability sampling

use keel_types::BatchId;
use rand::Rng;
use serde::Serialize;

/// Outcome of one sampling pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleReport {
    pub height: BatchId,
    pub requested: usize,
    pub succeeded: usize,
    /// `succeeded / requested`
    pub confidence: f64,
    pub available: bool,
}

impl SampleReport {
    pub(crate) fn new(height: BatchId, requested: usize, succeeded: usize, threshold: f64) -> Self {
        let confidence = if requested == 0 {
            0.0
        } else {
            succeeded as f64 / requested as f64
        };
        Self {
            height,
            requested,
            succeeded,
            confidence,
            available: requested > 0 && confidence >= threshold,
        }
    }
}

/// `count` shard indices drawn uniformly, with replacement, from `0..total`
pub fn sample_indices<R: Rng + ?Sized>(rng: &mut R, total: usize, count: usize) -> Vec<usize> {
    if total == 0 {
        return Vec::new();
    }
    (0..count).map(|_| rng.gen_range(0..total)).collect()
}
