//! Keel Sequencer - produces the ordered transaction sequence consensus votes on
//!
//! Architecture:
//! - Producers push candidates through a bounded `TransactionSender` into the pending pool
//! - One leader at a time, rotated round-robin over eligible sequencers
//! - Priority = 60% value + 40% age, aged against a round-fixed reference time
//! - Overdue high-priority transactions are force-included and counted against the leader
//! - Optional partitioned mode orders hash-keyed partitions on a rayon pool and
//!   concatenates them in partition-index order

pub mod config;
pub mod error;
pub mod leader;
pub mod ordering;
pub mod parallel;
pub mod pool;
pub mod priority;
pub mod sequencer;

pub use config::SequencerConfig;
pub use error::SequencerError;
pub use leader::LeaderRotation;
pub use ordering::{select_batch, DenyListPolicy, IncludeAll, InclusionPolicy, Selection};
pub use parallel::{partition_of, ParallelOrderer};
pub use pool::{PendingPool, TransactionSender};
pub use priority::{priority_score, sort_by_priority};
pub use sequencer::{CensorshipEvent, SequencedBatch, Sequencer, SequencerStats, SlashRequest};
