//! Sequencer leader rotation

use crate::config::SequencerConfig;
use crate::error::SequencerError;
use keel_registry::Registry;
use keel_types::Address;
use std::collections::HashMap;

/// Round-robin leadership over a fixed sequencer set.
///
/// A candidate is eligible when it is active in the registry, its reputation is above the
/// leader minimum, and its censorship count is still below the cap.
#[derive(Debug, Clone)]
pub struct LeaderRotation {
    sequencers: Vec<Address>,
    current: Option<usize>,
    /// Rounds led by the current leader since it took over
    rounds_led: u64,
    censorship: HashMap<Address, u32>,
    min_reputation: u32,
    censorship_cap: u32,
    rotate_every: u64,
}

impl LeaderRotation {
    pub fn new(sequencers: Vec<Address>, config: &SequencerConfig) -> Self {
        Self {
            sequencers,
            current: None,
            rounds_led: 0,
            censorship: HashMap::new(),
            min_reputation: config.leader_min_reputation,
            censorship_cap: config.censorship_cap,
            rotate_every: config.rotate_every_rounds.max(1),
        }
    }

    /// Append a sequencer to the end of the rotation
    pub fn add(&mut self, address: Address) -> Result<(), SequencerError> {
        if self.sequencers.contains(&address) {
            return Err(SequencerError::AlreadyInRotation(address));
        }
        self.sequencers.push(address);
        Ok(())
    }

    pub fn sequencers(&self) -> &[Address] {
        &self.sequencers
    }

    pub fn current(&self) -> Option<Address> {
        self.current.map(|i| self.sequencers[i])
    }

    pub fn is_eligible(&self, address: &Address, registry: &Registry) -> bool {
        if self.censorship_count(address) >= self.censorship_cap {
            return false;
        }
        registry
            .get(address)
            .map(|v| v.active && v.reputation > self.min_reputation)
            .unwrap_or(false)
    }

    /// Leader for the next round: keeps the current leader until its interval is up or it
    /// becomes ineligible, then rotates
    pub fn leader_for_round(&mut self, registry: &Registry) -> Result<Address, SequencerError> {
        let keep = match self.current() {
            Some(leader) => self.rounds_led < self.rotate_every && self.is_eligible(&leader, registry),
            None => false,
        };
        if !keep {
            self.rotate(registry)?;
        }
        self.rounds_led += 1;
        self.current().ok_or(SequencerError::NoEligibleLeader)
    }

    /// Move leadership to the next eligible candidate in round-robin order
    pub fn rotate(&mut self, registry: &Registry) -> Result<Address, SequencerError> {
        let n = self.sequencers.len();
        let start = self.current.map(|i| i + 1).unwrap_or(0);

        for step in 0..n {
            let idx = (start + step) % n;
            let candidate = self.sequencers[idx];
            if self.is_eligible(&candidate, registry) {
                let previous = self.current();
                self.current = Some(idx);
                self.rounds_led = 0;
                if previous != Some(candidate) {
                    tracing::info!("Sequencer leadership rotated to {}", candidate);
                }
                return Ok(candidate);
            }
            tracing::debug!("Skipping ineligible sequencer {}", candidate);
        }

        self.current = None;
        Err(SequencerError::NoEligibleLeader)
    }

    /// Count a censorship event against `address`; returns the new count
    pub fn record_censorship(&mut self, address: &Address) -> u32 {
        let count = self.censorship.entry(*address).or_insert(0);
        *count += 1;
        *count
    }

    pub fn censorship_count(&self, address: &Address) -> u32 {
        self.censorship.get(address).copied().unwrap_or(0)
    }

    pub fn censorship_cap(&self) -> u32 {
        self.censorship_cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_registry::{DeactivationReason, RegistryConfig};

    fn setup(n: usize) -> (Registry, Vec<Address>) {
        let registry = Registry::new(RegistryConfig::default());
        let addrs: Vec<Address> = (0..n).map(|i| Address::from_label(&format!("seq-{}", i))).collect();
        for addr in &addrs {
            registry.register(*addr, 1_000).unwrap();
        }
        (registry, addrs)
    }

    #[test]
    fn test_interval_rotation() {
        let (registry, addrs) = setup(3);
        let config = SequencerConfig {
            rotate_every_rounds: 2,
            ..Default::default()
        };
        let mut rotation = LeaderRotation::new(addrs.clone(), &config);

        let leaders: Vec<Address> = (0..6).map(|_| rotation.leader_for_round(&registry).unwrap()).collect();
        assert_eq!(leaders, vec![addrs[0], addrs[0], addrs[1], addrs[1], addrs[2], addrs[2]]);
        assert_eq!(rotation.leader_for_round(&registry).unwrap(), addrs[0]);
    }

    #[test]
    fn test_skips_ineligible() {
        let (registry, addrs) = setup(3);
        registry.deactivate(&addrs[1], DeactivationReason::Manual).unwrap();
        registry.adjust_reputation(&addrs[2], -60).unwrap();

        let mut rotation = LeaderRotation::new(addrs.clone(), &SequencerConfig::default());
        assert_eq!(rotation.rotate(&registry).unwrap(), addrs[0]);
        // 1 inactive, 2 below the leader minimum: wraps back to 0
        assert_eq!(rotation.rotate(&registry).unwrap(), addrs[0]);
    }

    #[test]
    fn test_reputation_must_exceed_minimum() {
        let (registry, addrs) = setup(2);
        registry.adjust_reputation(&addrs[0], -50).unwrap();
        registry.adjust_reputation(&addrs[1], -49).unwrap();

        let rotation = LeaderRotation::new(addrs.clone(), &SequencerConfig::default());
        assert_eq!(registry.get(&addrs[0]).unwrap().reputation, 50);
        assert!(!rotation.is_eligible(&addrs[0], &registry));
        assert!(rotation.is_eligible(&addrs[1], &registry));
    }

    #[test]
    fn test_censorship_cap_removes_eligibility() {
        let (registry, addrs) = setup(2);
        let config = SequencerConfig {
            censorship_cap: 2,
            ..Default::default()
        };
        let mut rotation = LeaderRotation::new(addrs.clone(), &config);
        assert_eq!(rotation.leader_for_round(&registry).unwrap(), addrs[0]);

        rotation.record_censorship(&addrs[0]);
        assert!(rotation.is_eligible(&addrs[0], &registry));
        rotation.record_censorship(&addrs[0]);
        assert!(!rotation.is_eligible(&addrs[0], &registry));
        assert_eq!(rotation.leader_for_round(&registry).unwrap(), addrs[1]);
    }

    #[test]
    fn test_no_eligible_leader() {
        let (registry, addrs) = setup(1);
        registry.deactivate(&addrs[0], DeactivationReason::Manual).unwrap();
        let mut rotation = LeaderRotation::new(addrs, &SequencerConfig::default());
        assert!(matches!(rotation.leader_for_round(&registry), Err(SequencerError::NoEligibleLeader)));
        assert!(rotation.current().is_none());

        let mut empty = LeaderRotation::new(Vec::new(), &SequencerConfig::default());
        assert!(matches!(empty.rotate(&registry), Err(SequencerError::NoEligibleLeader)));
    }
}
