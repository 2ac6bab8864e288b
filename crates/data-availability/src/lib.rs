//! Keel Data Availability - finalized payloads stay retrievable without full replication
//!
//! Architecture:
//! - Payloads are split into `k` data shards plus `m` Reed-Solomon parity shards; any `k`
//!   of the `k + m` reconstruct the payload exactly
//! - One blake3 commitment over the payload, plus a digest per shard so a custodian
//!   serving altered data is caught at the shard level
//! - Shards are spread round-robin over custodians, offset by height
//! - Light clients sample random shard indices and accept availability above a
//!   confidence threshold

pub mod commitment;
pub mod custodian;
pub mod distribution;
pub mod engine;
pub mod erasure;
pub mod error;
pub mod sampling;

pub use commitment::{payload_commitment, shard_digest};
pub use custodian::{InMemoryCustodian, ShardCustodian};
pub use distribution::assign_shards;
pub use engine::{DaBlock, DaConfig, DaEngine, DaStats};
pub use erasure::{EncodedPayload, ErasureCoder};
pub use error::DaError;
pub use sampling::{sample_indices, SampleReport};
