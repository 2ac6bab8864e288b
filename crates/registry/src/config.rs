//! Registry configuration

use serde::{Deserialize, Serialize};

/// Penalties applied by [`crate::Registry::slash`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlashPolicy {
    /// Fraction of stake removed, in basis points (1000 = 10%); capped at 10000
    pub stake_fraction_bps: u32,
    /// Reputation points removed per slash
    pub reputation_penalty: u32,
    /// Share of the slashed amount credited to the treasury, in basis points; the rest is
    /// burned. Capped at 10000
    pub treasury_share_bps: u32,
}

impl SlashPolicy {
    /// Basis points are out of 10000; larger configured values act as 100%
    pub(crate) fn stake_fraction(&self) -> u128 {
        self.stake_fraction_bps.min(BPS_DENOMINATOR) as u128
    }

    pub(crate) fn treasury_share(&self) -> u128 {
        self.treasury_share_bps.min(BPS_DENOMINATOR) as u128
    }
}

pub(crate) const BPS_DENOMINATOR: u32 = 10_000;

impl Default for SlashPolicy {
    fn default() -> Self {
        Self {
            stake_fraction_bps: 1_000,
            reputation_penalty: 20,
            treasury_share_bps: 5_000,
        }
    }
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Reputation given to newly registered validators
    pub initial_reputation: u32,
    /// Validators strictly below this reputation are deactivated
    pub reputation_floor: u32,
    /// Minimum stake accepted at registration
    pub min_stake: u64,
    /// Size cap of the active set (top N by stake, then reputation)
    pub max_active_validators: usize,
    /// Reputation lost when a proposer misses its round
    pub missed_round_penalty: u32,
    /// Reputation gained when a proposer's round finalizes
    pub proposed_round_reward: u32,
    /// Most active-set seats one entity may hold; 0 disables the cap
    pub max_per_entity: usize,
    /// Leading address bytes that identify an entity
    pub entity_prefix_len: usize,
    /// Jail once missed rounds exceed this...
    pub jail_missed_rounds: u64,
    /// ...while uptime (proposed / (proposed + missed)) is below this
    pub jail_min_uptime: f64,
    pub slash: SlashPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            initial_reputation: 100,
            reputation_floor: 20,
            min_stake: 1,
            max_active_validators: 100,
            missed_round_penalty: 5,
            proposed_round_reward: 1,
            max_per_entity: 5,
            entity_prefix_len: 8,
            jail_missed_rounds: 100,
            jail_min_uptime: 0.95,
            slash: SlashPolicy::default(),
        }
    }
}
