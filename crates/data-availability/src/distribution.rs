//! Shard-to-custodian assignment

use keel_types::{Address, BatchId};

/// Custodian for each shard of the block at `height`.
///
/// `custodians` must be in canonical (address) order. Shard `i` goes to custodian
/// `(height + i) mod n`, so shard load is balanced and consecutive blocks shift the
/// mapping.
pub fn assign_shards(custodians: &[Address], height: BatchId, total_shards: usize) -> Vec<Address> {
    if custodians.is_empty() {
        return Vec::new();
    }
    let n = custodians.len();
    let offset = (height % n as u64) as usize;
    (0..total_shards).map(|i| custodians[(offset + i) % n]).collect()
}
