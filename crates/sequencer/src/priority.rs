//! Priority scoring
//!
//! Scores are recomputed on every ordering pass and never stored. Age is always measured
//! against the round's reference time so every replay of the round agrees.

use crate::config::SequencerConfig;
use keel_types::Transaction;
use std::cmp::Ordering;

/// Priority in [0, 1]: weighted value component plus weighted age component
pub fn priority_score(tx: &Transaction, reference_ms: u64, config: &SequencerConfig) -> f64 {
    let value = saturating_ratio(tx.value, config.value_scale);
    let age = saturating_ratio(tx.age_ms(reference_ms), config.age_scale_ms);
    config.value_weight * value + config.age_weight * age
}

fn saturating_ratio(amount: u64, scale: u64) -> f64 {
    if scale == 0 {
        return 1.0;
    }
    (amount as f64 / scale as f64).min(1.0)
}

/// Highest score first, ties broken by hash ascending
pub(crate) fn compare(a: &(f64, &Transaction), b: &(f64, &Transaction)) -> Ordering {
    b.0.total_cmp(&a.0).then_with(|| a.1.hash.cmp(&b.1.hash))
}

/// Stable, fully deterministic priority sort
pub fn sort_by_priority(txs: Vec<Transaction>, reference_ms: u64, config: &SequencerConfig) -> Vec<Transaction> {
    let mut scored: Vec<(f64, &Transaction)> = txs
        .iter()
        .map(|tx| (priority_score(tx, reference_ms, config), tx))
        .collect();
    scored.sort_by(compare);
    scored.into_iter().map(|(_, tx)| tx.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::Address;

    fn tx(value: u64, submitted_at_ms: u64, nonce: u64) -> Transaction {
        Transaction::new(Address::from_label("alice"), Address::from_label("bob"), value, nonce, submitted_at_ms)
    }

    #[test]
    fn test_score_components() {
        let config = SequencerConfig::default();
        let now = 100_000;

        assert_eq!(priority_score(&tx(0, now, 0), now, &config), 0.0);
        assert!((priority_score(&tx(1_000_000, now, 0), now, &config) - 0.6).abs() < 1e-9);
        assert!((priority_score(&tx(0, now - 60_000, 0), now, &config) - 0.4).abs() < 1e-9);
        // saturates
        assert!((priority_score(&tx(u64::MAX, 0, 0), now, &config) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pending_45s_with_full_value_scores_0_9() {
        let config = SequencerConfig::default();
        let now = 1_000_000;
        let score = priority_score(&tx(1_000_000, now - 45_000, 0), now, &config);
        assert!((score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_future_submission_has_zero_age() {
        let config = SequencerConfig::default();
        assert_eq!(priority_score(&tx(0, 5_000, 0), 1_000, &config), 0.0);
    }

    #[test]
    fn test_sort_is_deterministic() {
        let config = SequencerConfig::default();
        let now = 500_000;
        let txs: Vec<Transaction> = (0..200).map(|i| tx((i % 7) * 100_000, now - (i % 5) * 1_000, i)).collect();

        let first = sort_by_priority(txs.clone(), now, &config);
        let mut reversed = txs.clone();
        reversed.reverse();

        for _ in 0..5 {
            assert_eq!(sort_by_priority(txs.clone(), now, &config), first);
        }
        assert_eq!(sort_by_priority(reversed, now, &config), first);
    }

    #[test]
    fn test_ties_break_by_hash() {
        let config = SequencerConfig::default();
        let a = tx(10, 0, 1);
        let b = tx(10, 0, 2);
        let sorted = sort_by_priority(vec![a.clone(), b.clone()], 0, &config);
        assert!(sorted[0].hash < sorted[1].hash);
    }
}
