//! Proposer selection - deterministic stake x reputation weighted walk

use keel_registry::ActiveSetSnapshot;
use keel_types::{Address, Hash, Round};

const ROUND_SEED_DOMAIN: &[u8] = b"keel/round-seed/v1";

/// Seed for a round, derived from the previous finalized batch commitment.
///
/// Anyone holding the finalized history can recompute it; it never depends on local time.
pub fn round_seed(previous_commitment: &Hash, round: Round) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(ROUND_SEED_DOMAIN);
    hasher.update(previous_commitment);
    hasher.update(&round.to_le_bytes());
    *hasher.finalize().as_bytes()
}

/// Pick the proposer for `seed` from `snapshot`.
///
/// Walks members in canonical (address) order accumulating `stake * reputation` and
/// returns the first whose cumulative weight exceeds `seed_fraction * total_weight`.
/// Returns `None` when the set carries no weight at all.
pub fn select_proposer(snapshot: &ActiveSetSnapshot, seed: &Hash) -> Option<Address> {
    let total = snapshot.total_weight();
    if total == 0 {
        return None;
    }

    let mut fraction = [0u8; 8];
    fraction.copy_from_slice(&seed[..8]);
    let target = scale(total, u64::from_le_bytes(fraction));

    let mut cumulative: u128 = 0;
    for member in snapshot.canonical() {
        cumulative += member.weight();
        if cumulative > target {
            return Some(member.address);
        }
    }

    // target < total, so the walk always returns above
    snapshot.canonical().last().map(|m| m.address)
}

/// `total * fraction / 2^64` without overflowing u128
fn scale(total: u128, fraction: u64) -> u128 {
    let fraction = fraction as u128;
    let high = (total >> 64) * fraction;
    let low = ((total & u64::MAX as u128) * fraction) >> 64;
    high + low
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_registry::ActiveMember;
    use std::collections::HashMap;

    fn snapshot(weights: &[(&str, u64, u32)]) -> ActiveSetSnapshot {
        ActiveSetSnapshot::from_members(
            weights
                .iter()
                .map(|(label, stake, reputation)| ActiveMember {
                    address: Address::from_label(label),
                    stake: *stake,
                    reputation: *reputation,
                })
                .collect(),
        )
    }

    #[test]
    fn test_selection_is_pure() {
        let set = snapshot(&[("a", 100, 100), ("b", 300, 90), ("c", 50, 100)]);
        let seed = round_seed(&[9u8; 32], 12);

        let first = select_proposer(&set, &seed);
        for _ in 0..10 {
            assert_eq!(select_proposer(&set, &seed), first);
        }
        assert!(first.is_some());
    }

    #[test]
    fn test_seed_depends_on_commitment_and_round() {
        let base = round_seed(&[1u8; 32], 5);
        assert_ne!(base, round_seed(&[2u8; 32], 5));
        assert_ne!(base, round_seed(&[1u8; 32], 6));
    }

    #[test]
    fn test_zero_weight_selects_nobody() {
        let set = snapshot(&[("a", 0, 100), ("b", 100, 0)]);
        assert_eq!(select_proposer(&set, &[7u8; 32]), None);
        assert_eq!(select_proposer(&ActiveSetSnapshot::default(), &[7u8; 32]), None);
    }

    #[test]
    fn test_seed_extremes() {
        let set = snapshot(&[("a", 100, 100), ("b", 100, 100)]);
        let first = set.canonical()[0].address;
        let last = set.canonical()[1].address;

        assert_eq!(select_proposer(&set, &[0u8; 32]), Some(first));
        assert_eq!(select_proposer(&set, &[0xffu8; 32]), Some(last));
    }

    #[test]
    fn test_selection_tracks_weight() {
        let set = snapshot(&[("heavy", 900, 100), ("light", 100, 100)]);
        let mut counts: HashMap<Address, u32> = HashMap::new();
        for round in 0..2_000 {
            let seed = round_seed(&[0u8; 32], round);
            if let Some(addr) = select_proposer(&set, &seed) {
                *counts.entry(addr).or_default() += 1;
            }
        }
        let heavy = counts[&Address::from_label("heavy")];
        assert!(heavy > 1_600 && heavy < 1_990, "heavy selected {} times", heavy);
    }

    #[test]
    fn test_scale_large_totals() {
        let total = u128::MAX / 3;
        assert!(scale(total, u64::MAX) < total);
        assert_eq!(scale(total, 0), 0);
    }
}
