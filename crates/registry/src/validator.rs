//! Validator records

use keel_types::{Address, Round};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provable misbehavior that leads to a slash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlashReason {
    /// Two different votes in the same round and phase
    ConflictingVotes,
    /// Proposal whose proof-of-order does not match its content
    InvalidProofOfOrder,
    /// Sequencer leader exceeded the censorship cap
    Censorship,
    /// Posted data does not match its commitment
    CommitmentMismatch,
}

impl fmt::Display for SlashReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlashReason::ConflictingVotes => "conflicting_votes",
            SlashReason::InvalidProofOfOrder => "invalid_proof_of_order",
            SlashReason::Censorship => "censorship",
            SlashReason::CommitmentMismatch => "commitment_mismatch",
        };
        f.write_str(s)
    }
}

/// Why a validator left the active set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeactivationReason {
    /// Operator or governance request
    Manual,
    /// Reputation dropped below the floor
    ReputationFloor,
    /// Stake clamped to zero
    StakeExhausted,
    /// Too many missed rounds at low uptime; leaves only through `Registry::unjail`
    Jailed,
}

impl fmt::Display for DeactivationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeactivationReason::Manual => "manual",
            DeactivationReason::ReputationFloor => "reputation_floor",
            DeactivationReason::StakeExhausted => "stake_exhausted",
            DeactivationReason::Jailed => "jailed",
        };
        f.write_str(s)
    }
}

/// One entry of a validator's slash history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashRecord {
    pub reason: SlashReason,
    pub amount: u64,
    /// Wall-clock time of the slash (unix millis)
    pub timestamp_ms: u64,
    /// Round in which the misbehavior was observed, if known
    pub round: Option<Round>,
}

/// A registered validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub address: Address,
    pub stake: u64,
    /// Always within `[0, MAX_REPUTATION]`
    pub reputation: u32,
    pub active: bool,
    pub deactivation_reason: Option<DeactivationReason>,
    pub slash_history: Vec<SlashRecord>,
    pub rounds_proposed: u64,
    pub rounds_missed: u64,
}

impl Validator {
    pub(crate) fn new(address: Address, stake: u64, reputation: u32) -> Self {
        Self {
            address,
            stake,
            reputation,
            active: true,
            deactivation_reason: None,
            slash_history: Vec::new(),
            rounds_proposed: 0,
            rounds_missed: 0,
        }
    }

    /// Total amount ever slashed from this validator
    pub fn total_slashed(&self) -> u64 {
        self.slash_history.iter().map(|r| r.amount).sum()
    }

    /// Share of its proposer rounds that finalized; 1.0 before any round
    pub fn uptime(&self) -> f64 {
        let total = self.rounds_proposed + self.rounds_missed;
        if total == 0 {
            return 1.0;
        }
        self.rounds_proposed as f64 / total as f64
    }

    pub fn is_jailed(&self) -> bool {
        self.deactivation_reason == Some(DeactivationReason::Jailed)
    }

    /// Proposer weight: stake scaled by reputation
    pub fn weight(&self) -> u128 {
        self.stake as u128 * self.reputation as u128
    }

    /// Deactivate on exhausted stake or sub-floor reputation.
    ///
    /// Returns the reason if this call flipped the validator to inactive.
    pub(crate) fn enforce_invariants(&mut self, reputation_floor: u32) -> Option<DeactivationReason> {
        self.reputation = self.reputation.min(crate::MAX_REPUTATION);

        let reason = if self.stake == 0 {
            Some(DeactivationReason::StakeExhausted)
        } else if self.reputation < reputation_floor {
            Some(DeactivationReason::ReputationFloor)
        } else {
            None
        }?;

        if self.active {
            self.active = false;
            self.deactivation_reason = Some(reason);
            Some(reason)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enforce_invariants_deactivates_below_floor() {
        let mut v = Validator::new(Address::from_label("v"), 100, 19);
        assert_eq!(v.enforce_invariants(20), Some(DeactivationReason::ReputationFloor));
        assert!(!v.active);

        // Already inactive: no second transition
        assert_eq!(v.enforce_invariants(20), None);
    }

    #[test]
    fn test_enforce_invariants_zero_stake() {
        let mut v = Validator::new(Address::from_label("v"), 0, 100);
        assert_eq!(v.enforce_invariants(20), Some(DeactivationReason::StakeExhausted));
    }

    #[test]
    fn test_uptime() {
        let mut v = Validator::new(Address::from_label("v"), 100, 100);
        assert_eq!(v.uptime(), 1.0);
        v.rounds_proposed = 19;
        v.rounds_missed = 1;
        assert!((v.uptime() - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_weight() {
        let v = Validator::new(Address::from_label("v"), 1_000, 50);
        assert_eq!(v.weight(), 50_000);
    }
}
