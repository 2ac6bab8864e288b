//! Immutable view of the active set captured at round start

use crate::validator::Validator;
use keel_types::Address;
use std::collections::HashMap;

/// One member of an active-set snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveMember {
    pub address: Address,
    pub stake: u64,
    pub reputation: u32,
}

impl ActiveMember {
    pub fn weight(&self) -> u128 {
        self.stake as u128 * self.reputation as u128
    }
}

/// The active set as of one instant.
///
/// A round holds on to one snapshot for proposer selection and quorum counting even if
/// the registry changes underneath it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveSetSnapshot {
    /// Ordered by (stake, reputation) descending, ties by address ascending
    members: Vec<ActiveMember>,
    /// Same members ordered by address, the canonical walk order for proposer selection
    canonical: Vec<ActiveMember>,
}

impl ActiveSetSnapshot {
    /// Active validators ranked by (stake, reputation), at most `max_per_entity` per entity
    /// (validators sharing the first `entity_prefix_len` address bytes), then truncated to
    /// `max_active`
    pub(crate) fn build<'a>(
        validators: impl Iterator<Item = &'a Validator>,
        max_active: usize,
        max_per_entity: usize,
        entity_prefix_len: usize,
    ) -> Self {
        let mut members: Vec<ActiveMember> = validators
            .filter(|v| v.active)
            .map(|v| ActiveMember {
                address: v.address,
                stake: v.stake,
                reputation: v.reputation,
            })
            .collect();

        members.sort_by(|a, b| {
            b.stake
                .cmp(&a.stake)
                .then_with(|| b.reputation.cmp(&a.reputation))
                .then_with(|| a.address.cmp(&b.address))
        });
        if max_per_entity > 0 {
            let prefix = entity_prefix_len.clamp(1, 32);
            let mut seats: HashMap<&[u8], usize> = HashMap::new();
            let mut capped = Vec::with_capacity(members.len());
            for member in &members {
                let held = seats.entry(&member.address.as_bytes()[..prefix]).or_insert(0);
                if *held < max_per_entity {
                    *held += 1;
                    capped.push(*member);
                }
            }
            members = capped;
        }
        members.truncate(max_active);

        let mut canonical = members.clone();
        canonical.sort_by(|a, b| a.address.cmp(&b.address));

        Self { members, canonical }
    }

    /// Build a snapshot directly from members (tests and replays)
    pub fn from_members(members: Vec<ActiveMember>) -> Self {
        let mut canonical = members.clone();
        canonical.sort_by(|a, b| a.address.cmp(&b.address));
        let mut ordered = members;
        ordered.sort_by(|a, b| {
            b.stake
                .cmp(&a.stake)
                .then_with(|| b.reputation.cmp(&a.reputation))
                .then_with(|| a.address.cmp(&b.address))
        });
        Self {
            members: ordered,
            canonical,
        }
    }

    /// Members by (stake, reputation) descending
    pub fn members(&self) -> &[ActiveMember] {
        &self.members
    }

    /// Members by address ascending
    pub fn canonical(&self) -> &[ActiveMember] {
        &self.canonical
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.canonical
            .binary_search_by(|m| m.address.cmp(address))
            .is_ok()
    }

    pub fn get(&self, address: &Address) -> Option<&ActiveMember> {
        self.canonical
            .binary_search_by(|m| m.address.cmp(address))
            .ok()
            .map(|i| &self.canonical[i])
    }

    pub fn total_weight(&self) -> u128 {
        self.members.iter().map(|m| m.weight()).sum()
    }

    pub fn total_stake(&self) -> u64 {
        self.members.iter().map(|m| m.stake).sum()
    }

    /// Smallest member count that reaches `numerator / denominator` of the set,
    /// i.e. `ceil(len * numerator / denominator)`
    pub fn threshold(&self, numerator: u64, denominator: u64) -> usize {
        if denominator == 0 {
            return self.len();
        }
        let n = self.len() as u64 * numerator;
        n.div_ceil(denominator) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(label: &str, stake: u64, reputation: u32) -> ActiveMember {
        ActiveMember {
            address: Address::from_label(label),
            stake,
            reputation,
        }
    }

    #[test]
    fn test_threshold_rounds_up() {
        let members = (0..10).map(|i| member(&format!("v{i}"), 100, 100)).collect();
        let snapshot = ActiveSetSnapshot::from_members(members);
        assert_eq!(snapshot.threshold(2, 3), 7);
        assert_eq!(snapshot.threshold(1, 3), 4);

        let members = (0..9).map(|i| member(&format!("v{i}"), 100, 100)).collect();
        let snapshot = ActiveSetSnapshot::from_members(members);
        assert_eq!(snapshot.threshold(2, 3), 6);
        assert_eq!(snapshot.threshold(1, 3), 3);
    }

    #[test]
    fn test_ordering_and_lookup() {
        let snapshot = ActiveSetSnapshot::from_members(vec![
            member("a", 10, 90),
            member("b", 30, 50),
            member("c", 10, 100),
        ]);

        let order: Vec<u64> = snapshot.members().iter().map(|m| m.stake).collect();
        assert_eq!(order, vec![30, 10, 10]);
        assert_eq!(snapshot.members()[1].reputation, 100);

        assert!(snapshot.contains(&Address::from_label("a")));
        assert!(!snapshot.contains(&Address::from_label("z")));
        assert_eq!(snapshot.total_stake(), 50);
    }
}
