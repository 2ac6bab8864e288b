//! Local cluster configuration

use anyhow::{Context, Result};
use keel_pipeline::NodeConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// In-process cluster the node simulates around the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalClusterConfig {
    /// Validators registered and voting locally
    pub validators: usize,
    /// Stake each local validator registers with
    pub stake: u64,
    /// How many of the validators never vote
    pub silent_validators: usize,
    /// In-memory shard custodians
    pub custodians: usize,
    /// Demo transactions submitted per round interval (0 = none)
    pub demo_load: usize,
}

impl Default for LocalClusterConfig {
    fn default() -> Self {
        Self {
            validators: 4,
            stake: 1_000,
            silent_validators: 0,
            custodians: 8,
            demo_load: 0,
        }
    }
}

/// Everything the `keel` binary reads from its config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelConfig {
    #[serde(flatten)]
    pub node: NodeConfig,
    pub cluster: LocalClusterConfig,
}

impl KeelConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))
    }
}
