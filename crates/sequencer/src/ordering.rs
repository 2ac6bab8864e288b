//! Batch selection: leader preference, forced inclusion and batch capacity

use crate::config::SequencerConfig;
use crate::priority::{compare, priority_score};
use keel_types::{Address, Hash, Transaction};
use std::collections::HashSet;

/// The leader's local preference over which pending transactions to include
pub trait InclusionPolicy: Send + Sync {
    fn include(&self, leader: &Address, tx: &Transaction) -> bool;
}

/// Include every pending transaction
#[derive(Debug, Default, Clone, Copy)]
pub struct IncludeAll;

impl InclusionPolicy for IncludeAll {
    fn include(&self, _leader: &Address, _tx: &Transaction) -> bool {
        true
    }
}

/// Excludes a fixed set of transaction hashes (fault injection, censoring leaders)
#[derive(Debug, Default, Clone)]
pub struct DenyListPolicy {
    denied: HashSet<Hash>,
}

impl DenyListPolicy {
    pub fn new(denied: impl IntoIterator<Item = Hash>) -> Self {
        Self {
            denied: denied.into_iter().collect(),
        }
    }
}

impl InclusionPolicy for DenyListPolicy {
    fn include(&self, _leader: &Address, tx: &Transaction) -> bool {
        !self.denied.contains(&tx.hash)
    }
}

/// Which transactions make the next batch
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Selected transactions, highest priority first
    pub transactions: Vec<Transaction>,
    /// Overdue high-priority transactions included regardless of the leader
    pub forced: Vec<Hash>,
    /// Forced transactions the leader's policy had excluded (censorship evidence),
    /// with their age and priority score
    pub censored: Vec<(Hash, u64, f64)>,
}

/// Pick the batch from `pending` for `leader` at the round reference time.
///
/// Overdue (age above the censorship threshold) transactions whose priority is above the
/// censorship threshold are always included. Remaining capacity, sized by
/// [`SequencerConfig::batch_limit`] for the pool length, goes to the leader's preferred
/// transactions by priority.
pub fn select_batch(
    pending: &[Transaction],
    reference_ms: u64,
    leader: &Address,
    policy: &dyn InclusionPolicy,
    config: &SequencerConfig,
) -> Selection {
    let mut scored: Vec<(f64, &Transaction)> = pending
        .iter()
        .map(|tx| (priority_score(tx, reference_ms, config), tx))
        .collect();
    scored.sort_by(compare);

    let mut selection = Selection::default();
    let mut preferred: Vec<(f64, &Transaction)> = Vec::new();
    let mut chosen: Vec<(f64, &Transaction)> = Vec::new();

    for (score, tx) in scored {
        let age = tx.age_ms(reference_ms);
        let overdue = age > config.censorship_age_ms && score > config.censorship_priority;
        let wanted = policy.include(leader, tx);

        if overdue {
            selection.forced.push(tx.hash);
            if !wanted {
                selection.censored.push((tx.hash, age, score));
            }
            chosen.push((score, tx));
        } else if wanted {
            preferred.push((score, tx));
        }
    }

    let room = config.batch_limit(pending.len()).saturating_sub(chosen.len());
    chosen.extend(preferred.into_iter().take(room));
    chosen.sort_by(compare);

    selection.transactions = chosen.into_iter().map(|(_, tx)| tx.clone()).collect();
    selection
}
