//! Node configuration

use crate::error::PipelineError;
use keel_consensus::ConsensusConfig;
use keel_da::DaConfig;
use keel_registry::RegistryConfig;
use keel_sequencer::SequencerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Interval between round attempts
    pub round_interval_ms: u64,
    /// Sample a block right after posting it
    pub sample_after_post: bool,
    /// Capacity of the proposal broadcast and vote inbox
    pub gossip_capacity: usize,
    /// Capacity of the finalized-batch event channel
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            round_interval_ms: 500,
            sample_after_post: true,
            gossip_capacity: 4096,
            event_capacity: 256,
        }
    }
}

/// Every component's configuration; missing sections fall back to defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub registry: RegistryConfig,
    pub consensus: ConsensusConfig,
    pub sequencer: SequencerConfig,
    pub da: DaConfig,
    pub pipeline: PipelineConfig,
}

impl NodeConfig {
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(json).map_err(|e| PipelineError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, PipelineError> {
        serde_json::to_string_pretty(self).map_err(|e| PipelineError::Config(e.to_string()))
    }
}
