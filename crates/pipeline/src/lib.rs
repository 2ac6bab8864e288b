//! Keel Pipeline - drives one finality round at a time
//!
//! Per round: sequencer orders the pending pool, the execution collaborator returns a
//! state root, settlement records the batch, consensus votes on it, and a finalized batch
//! is posted to data availability and sampled before the round is reported.

pub mod config;
pub mod coordinator;
pub mod error;

pub use config::{NodeConfig, PipelineConfig};
pub use coordinator::{decode_payload, encode_payload, PipelineBuilder, PipelineCoordinator, PipelineStats, RoundReport};
pub use error::PipelineError;

#[cfg(test)]
mod tests;
