//! Shard custody seam

use crate::error::DaError;
use async_trait::async_trait;
use dashmap::DashMap;
use keel_types::{Address, BatchId};
use std::sync::atomic::{AtomicBool, Ordering};

/// A DA validator that stores and serves shards
#[async_trait]
pub trait ShardCustodian: Send + Sync {
    fn id(&self) -> Address;

    /// Store a shard; `Ok` is the acknowledgement
    async fn store(&self, height: BatchId, index: usize, shard: Vec<u8>) -> Result<(), DaError>;

    /// Serve a shard, or `None` if it is not held or the custodian is unreachable
    async fn fetch(&self, height: BatchId, index: usize) -> Option<Vec<u8>>;
}

/// In-process custodian with fault injection
pub struct InMemoryCustodian {
    id: Address,
    shards: DashMap<(BatchId, usize), Vec<u8>>,
    online: AtomicBool,
}

impl InMemoryCustodian {
    pub fn new(id: Address) -> Self {
        Self {
            id,
            shards: DashMap::new(),
            online: AtomicBool::new(true),
        }
    }

    /// Offline custodians refuse stores and serve nothing
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Lose a shard
    pub fn drop_shard(&self, height: BatchId, index: usize) -> bool {
        self.shards.remove(&(height, index)).is_some()
    }

    /// Flip a byte of a held shard
    pub fn corrupt_shard(&self, height: BatchId, index: usize) -> bool {
        match self.shards.get_mut(&(height, index)) {
            Some(mut shard) if !shard.is_empty() => {
                shard[0] ^= 0xff;
                true
            }
            _ => false,
        }
    }

    pub fn stored(&self) -> usize {
        self.shards.len()
    }
}

#[async_trait]
impl ShardCustodian for InMemoryCustodian {
    fn id(&self) -> Address {
        self.id
    }

    async fn store(&self, height: BatchId, index: usize, shard: Vec<u8>) -> Result<(), DaError> {
        if !self.is_online() {
            return Err(DaError::CustodianOffline(self.id));
        }
        self.shards.insert((height, index), shard);
        Ok(())
    }

    async fn fetch(&self, height: BatchId, index: usize) -> Option<Vec<u8>> {
        if !self.is_online() {
            return None;
        }
        self.shards.get(&(height, index)).map(|s| s.clone())
    }
}
